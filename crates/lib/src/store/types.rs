use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::action::RawDefinition;
use crate::consts::FORMAT_VERSION;
use crate::context::BuildContext;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to create directory {path}: {source}")]
  CreateDir {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize store data: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("{path} uses format version {found}, this build understands version {expected}; wipe it and rebuild")]
  IncompatibleFormat { path: String, found: u32, expected: u32 },

  #[error("package {0} not found in store")]
  PackageNotFound(String),

  #[error("invalid package reference '{0}': expected name:version")]
  InvalidPackageRef(String),
}

/// Identifies one deployment of a package: package, version, chain and preset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
  pub name: String,
  pub version: String,
  pub chain_id: u64,
  pub preset: String,
}

impl VariantKey {
  pub fn new(name: impl Into<String>, version: impl Into<String>, chain_id: u64, preset: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
      chain_id,
      preset: preset.into(),
    }
  }

  /// `<chainId>-<preset>`, the key of the variant inside its manifest.
  pub fn variant_id(&self) -> String {
    format!("{}-{}", self.chain_id, self.preset)
  }
}

impl fmt::Display for VariantKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}@{}", self.name, self.version, self.variant_id())
  }
}

/// Split `name:version`.
pub fn parse_package_ref(reference: &str) -> Result<(&str, &str), StoreError> {
  match reference.split_once(':') {
    Some((name, version)) if !name.is_empty() && !version.is_empty() => Ok((name, version)),
    _ => Err(StoreError::InvalidPackageRef(reference.to_string())),
  }
}

/// The cache entry of one action under one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
  pub format_version: u32,
  /// Fingerprint of the resolved configuration; `None` for actions that opt out of caching.
  pub hash: Option<String>,
  /// Contracts, transactions and imports the action itself produced, with
  /// the package, settings and timestamp it ran under. Inherited entries are
  /// not stored; a reused record is overlaid on its dependencies' current
  /// outputs.
  pub output: BuildContext,
}

impl ActionRecord {
  pub fn new(hash: Option<String>, output: BuildContext) -> Self {
    Self {
      format_version: FORMAT_VERSION,
      hash,
      output,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
  /// A build started and has not completed.
  #[default]
  Partial,
  Complete,
}

/// State of one `(chainId, preset)` deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantRecord {
  pub chain_id: u64,
  pub preset: String,
  /// Settings supplied to the last build.
  #[serde(default)]
  pub options: BTreeMap<String, String>,
  #[serde(default)]
  pub status: BuildStatus,
  /// Fingerprint of the merged outputs of the last complete build.
  #[serde(default)]
  pub head: Option<String>,
  #[serde(default)]
  pub records: BTreeMap<String, ActionRecord>,
}

/// Everything persisted for one package version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
  pub format_version: u32,
  pub def: RawDefinition,
  #[serde(default)]
  pub variants: BTreeMap<String, VariantRecord>,
}

impl DeploymentManifest {
  pub fn new(def: RawDefinition) -> Self {
    Self {
      format_version: FORMAT_VERSION,
      def,
      variants: BTreeMap::new(),
    }
  }

  pub fn variant(&self, key: &VariantKey) -> Option<&VariantRecord> {
    self.variants.get(&key.variant_id())
  }

  pub fn variant_mut(&mut self, key: &VariantKey) -> &mut VariantRecord {
    self
      .variants
      .entry(key.variant_id())
      .or_insert_with(|| VariantRecord {
        chain_id: key.chain_id,
        preset: key.preset.clone(),
        ..Default::default()
      })
  }
}

/// Checks the `formatVersion` field of raw store JSON before deserializing.
pub(super) fn check_format(path: &str, doc: &Value) -> Result<(), StoreError> {
  let found = doc.get("formatVersion").and_then(Value::as_u64).unwrap_or_default() as u32;
  if found != FORMAT_VERSION {
    return Err(StoreError::IncompatibleFormat {
      path: path.to_string(),
      found,
      expected: FORMAT_VERSION,
    });
  }
  Ok(())
}
