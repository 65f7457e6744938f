//! Contract artifacts.
//!
//! An artifact is compiler output for one contract: ABI, creation bytecode and
//! the positions of unlinked library references. Artifacts are looked up by
//! contract name through an [`ArtifactSource`]:
//!
//! - [`ArtifactDir`] reads Foundry (`out/`) or Hardhat (`artifacts/`) output
//! - [`CachedArtifacts`] persists each artifact on first fetch, so a package
//!   can be rebuilt without the original compiler output
//! - [`ArtifactMap`] holds artifacts in memory

mod dir;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use dir::ArtifactDir;

#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("artifact '{name}' not found in {searched}")]
  NotFound { name: String, searched: String },

  #[error("failed to read artifact {path}: {message}")]
  Read { path: String, message: String },

  #[error("failed to parse artifact {path}: {message}")]
  Parse { path: String, message: String },

  #[error("failed to write artifact {path}: {message}")]
  Write { path: String, message: String },

  #[error("library '{library}' required by {contract} has no address")]
  UnlinkedLibrary { contract: String, library: String },

  #[error("library '{library}' address {address} does not fill {length} bytes in {contract}")]
  InvalidLibraryAddress {
    contract: String,
    library: String,
    address: String,
    length: usize,
  },

  #[error("link reference for '{library}' at byte {start} (+{length}) lies outside the bytecode of {contract}")]
  LinkOutOfRange {
    contract: String,
    library: String,
    start: usize,
    length: usize,
  },
}

/// Byte range of an unlinked library address inside creation bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOffset {
  pub start: usize,
  pub length: usize,
}

/// `source file -> library name -> offsets`
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<LinkOffset>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
  pub contract_name: String,
  pub source_name: String,
  pub abi: Value,
  /// Hex creation bytecode with `0x` prefix, possibly containing placeholders.
  pub bytecode: String,
  #[serde(default)]
  pub link_references: LinkReferences,
}

impl ContractArtifact {
  /// Names of the libraries this artifact must be linked against.
  pub fn required_libraries(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self
      .link_references
      .values()
      .flat_map(|libs| libs.keys().map(String::as_str))
      .collect();
    names.sort_unstable();
    names.dedup();
    names
  }

  /// Splice library addresses into the bytecode.
  ///
  /// Each reference replaces the hex characters at its byte offset. Every
  /// reference must be filled: a missing library, an address of the wrong
  /// width or non-hex digits, and an offset outside the bytecode are errors.
  pub fn link(&self, libraries: &BTreeMap<String, String>) -> Result<String, ArtifactError> {
    let prefixed = self.bytecode.starts_with("0x");
    let mut code: Vec<u8> = self.bytecode.trim_start_matches("0x").as_bytes().to_vec();

    for libs in self.link_references.values() {
      for (lib, offsets) in libs {
        let address = libraries.get(lib).ok_or_else(|| ArtifactError::UnlinkedLibrary {
          contract: self.contract_name.clone(),
          library: lib.clone(),
        })?;
        let digits = address.trim_start_matches("0x").to_ascii_lowercase();
        for offset in offsets {
          if digits.len() != offset.length * 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ArtifactError::InvalidLibraryAddress {
              contract: self.contract_name.clone(),
              library: lib.clone(),
              address: address.clone(),
              length: offset.length,
            });
          }
          let begin = offset.start * 2;
          let end = begin + digits.len();
          if end > code.len() {
            return Err(ArtifactError::LinkOutOfRange {
              contract: self.contract_name.clone(),
              library: lib.clone(),
              start: offset.start,
              length: offset.length,
            });
          }
          code[begin..end].copy_from_slice(digits.as_bytes());
        }
      }
    }

    let linked = String::from_utf8_lossy(&code).into_owned();
    Ok(if prefixed { format!("0x{}", linked) } else { linked })
  }
}

/// Looks up artifacts by contract name.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
  async fn get_artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError>;
}

/// Artifacts held in memory.
#[derive(Debug, Default)]
pub struct ArtifactMap {
  artifacts: Mutex<BTreeMap<String, ContractArtifact>>,
}

impl ArtifactMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, artifact: ContractArtifact) {
    if let Ok(mut map) = self.artifacts.lock() {
      map.insert(artifact.contract_name.clone(), artifact);
    }
  }
}

#[async_trait]
impl ArtifactSource for ArtifactMap {
  async fn get_artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
    self
      .artifacts
      .lock()
      .ok()
      .and_then(|map| map.get(name).cloned())
      .ok_or_else(|| ArtifactError::NotFound {
        name: name.to_string(),
        searched: "memory".to_string(),
      })
  }
}

/// Pass-through source that persists every artifact it serves.
pub struct CachedArtifacts {
  inner: Arc<dyn ArtifactSource>,
  dir: PathBuf,
}

impl CachedArtifacts {
  pub fn new(inner: Arc<dyn ArtifactSource>, dir: impl Into<PathBuf>) -> Self {
    Self { inner, dir: dir.into() }
  }

  fn path_for(&self, name: &str) -> PathBuf {
    self.dir.join(format!("{}.json", name))
  }

  fn persist(path: &Path, artifact: &ContractArtifact) -> Result<(), ArtifactError> {
    let write_err = |message: String| ArtifactError::Write {
      path: path.display().to_string(),
      message,
    };
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }
    let content = serde_json::to_string_pretty(artifact).map_err(|e| write_err(e.to_string()))?;
    let temp = path.with_extension("json.tmp");
    std::fs::write(&temp, content).map_err(|e| write_err(e.to_string()))?;
    std::fs::rename(&temp, path).map_err(|e| write_err(e.to_string()))
  }
}

#[async_trait]
impl ArtifactSource for CachedArtifacts {
  async fn get_artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
    let path = self.path_for(name);
    if path.exists() {
      let content = std::fs::read_to_string(&path).map_err(|e| ArtifactError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
      })?;
      return serde_json::from_str(&content).map_err(|e| ArtifactError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
      });
    }

    let artifact = self.inner.get_artifact(name).await?;
    Self::persist(&path, &artifact)?;
    debug!(artifact = %name, path = %path.display(), "cached artifact");
    Ok(artifact)
  }
}
