//! Durable deployment store.
//!
//! Persists everything a build needs to resume or be inspected later: the
//! raw definition, one [`ActionRecord`] per action and variant, and one
//! chain-state blob per state layer.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! └── <name>/<version>/
//!     ├── manifest.json                  # DeploymentManifest: def + variants + records
//!     └── layers/<chainId>-<preset>/
//!         └── <layer key>.json           # dumped chain state of one layer
//! ```
//!
//! All writes are atomic (temp file, then rename). Data written with another
//! format version is rejected with [`StoreError::IncompatibleFormat`].

mod types;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::action::RawDefinition;
use crate::consts::{FORMAT_VERSION, STORE_DIR_ENV};

pub use types::*;

const MANIFEST_FILENAME: &str = "manifest.json";
const LAYERS_DIR: &str = "layers";

/// Resolves imported packages to their definitions.
#[async_trait]
pub trait PackageSource: Send + Sync {
  /// Load the definition of `name:version`.
  async fn load_definition(&self, reference: &str) -> Result<RawDefinition, StoreError>;
}

#[derive(Debug, Clone)]
pub struct DeploymentStore {
  root: PathBuf,
}

impl DeploymentStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Store at `$CANNON_DIRECTORY`, or the user data directory
  /// (`$XDG_DATA_HOME/cannon`, falling back to `~/.local/share/cannon`).
  pub fn default_store() -> Self {
    if let Ok(dir) = std::env::var(STORE_DIR_ENV) {
      return Self::new(dir);
    }
    let data_home = std::env::var("XDG_DATA_HOME").map(PathBuf::from).unwrap_or_else(|_| {
      std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".local")
        .join("share")
    });
    Self::new(data_home.join("cannon"))
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn package_dir(&self, name: &str, version: &str) -> PathBuf {
    self.root.join(name).join(version)
  }

  fn manifest_path(&self, name: &str, version: &str) -> PathBuf {
    self.package_dir(name, version).join(MANIFEST_FILENAME)
  }

  fn layers_dir(&self, key: &VariantKey) -> PathBuf {
    self.package_dir(&key.name, &key.version).join(LAYERS_DIR).join(key.variant_id())
  }

  fn layer_path(&self, key: &VariantKey, layer: &str) -> PathBuf {
    self.layers_dir(key).join(format!("{}.json", layer))
  }

  /// Load the manifest of a package version, `None` if it was never built.
  pub fn read_manifest(&self, name: &str, version: &str) -> Result<Option<DeploymentManifest>, StoreError> {
    let path = self.manifest_path(name, version);
    let Some(doc) = read_json::<Value>(&path)? else {
      return Ok(None);
    };
    let display = path.display().to_string();
    check_format(&display, &doc)?;
    serde_json::from_value(doc)
      .map(Some)
      .map_err(|source| StoreError::Parse { path: display, source })
  }

  pub fn write_manifest(&self, manifest: &DeploymentManifest) -> Result<(), StoreError> {
    let path = self.manifest_path(&manifest.def.name, &manifest.def.version);
    write_json_atomic(&path, manifest)
  }

  fn update_manifest<T>(
    &self,
    name: &str,
    version: &str,
    update: impl FnOnce(&mut DeploymentManifest) -> T,
  ) -> Result<T, StoreError> {
    let mut manifest = self
      .read_manifest(name, version)?
      .ok_or_else(|| StoreError::PackageNotFound(format!("{}:{}", name, version)))?;
    let result = update(&mut manifest);
    self.write_manifest(&manifest)?;
    Ok(result)
  }

  /// Persist a definition, keeping any variants already recorded.
  pub fn write_definition(&self, def: &RawDefinition) -> Result<(), StoreError> {
    let manifest = match self.read_manifest(&def.name, &def.version)? {
      Some(mut existing) => {
        existing.def = def.clone();
        existing
      }
      None => DeploymentManifest::new(def.clone()),
    };
    self.write_manifest(&manifest)?;
    debug!(package = %def.package_ref(), "stored definition");
    Ok(())
  }

  pub fn read_definition(&self, name: &str, version: &str) -> Result<Option<RawDefinition>, StoreError> {
    Ok(self.read_manifest(name, version)?.map(|m| m.def))
  }

  pub fn read_variant(&self, key: &VariantKey) -> Result<Option<VariantRecord>, StoreError> {
    Ok(
      self
        .read_manifest(&key.name, &key.version)?
        .and_then(|m| m.variant(key).cloned()),
    )
  }

  pub fn read_record(&self, key: &VariantKey, action: &str) -> Result<Option<ActionRecord>, StoreError> {
    let Some(variant) = self.read_variant(key)? else {
      return Ok(None);
    };
    let Some(record) = variant.records.get(action) else {
      return Ok(None);
    };
    if record.format_version != FORMAT_VERSION {
      return Err(StoreError::IncompatibleFormat {
        path: format!("{} record {}", key, action),
        found: record.format_version,
        expected: FORMAT_VERSION,
      });
    }
    Ok(Some(record.clone()))
  }

  pub fn write_record(&self, key: &VariantKey, action: &str, record: &ActionRecord) -> Result<(), StoreError> {
    self.update_manifest(&key.name, &key.version, |m| {
      m.variant_mut(key).records.insert(action.to_string(), record.clone());
    })?;
    debug!(variant = %key, action, "stored action record");
    Ok(())
  }

  /// Record the outcome of a build for a variant.
  pub fn set_status(
    &self,
    key: &VariantKey,
    status: BuildStatus,
    options: &std::collections::BTreeMap<String, String>,
    head: Option<String>,
  ) -> Result<(), StoreError> {
    self.update_manifest(&key.name, &key.version, |m| {
      let variant = m.variant_mut(key);
      variant.status = status;
      variant.options = options.clone();
      if head.is_some() {
        variant.head = head;
      }
    })
  }

  pub fn write_layer_state(&self, key: &VariantKey, layer: &str, state: &Value) -> Result<(), StoreError> {
    write_json_atomic(&self.layer_path(key, layer), state)?;
    debug!(variant = %key, layer, "stored layer state");
    Ok(())
  }

  pub fn read_layer_state(&self, key: &VariantKey, layer: &str) -> Result<Option<Value>, StoreError> {
    read_json(&self.layer_path(key, layer))
  }

  /// Delete every record and layer state of a variant.
  ///
  /// The definition and other variants are kept. Wiping a variant that was
  /// never built is not an error.
  pub fn wipe(&self, key: &VariantKey) -> Result<(), StoreError> {
    if self.read_manifest(&key.name, &key.version)?.is_some() {
      self.update_manifest(&key.name, &key.version, |m| {
        m.variants.remove(&key.variant_id());
      })?;
    }

    let layers = self.layers_dir(key);
    match fs::remove_dir_all(&layers) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(source) => {
        return Err(StoreError::Write {
          path: layers.display().to_string(),
          source,
        });
      }
    }

    info!(variant = %key, "wiped deployment");
    Ok(())
  }
}

#[async_trait]
impl PackageSource for DeploymentStore {
  async fn load_definition(&self, reference: &str) -> Result<RawDefinition, StoreError> {
    let (name, version) = parse_package_ref(reference)?;
    self
      .read_definition(name, version)?
      .ok_or_else(|| StoreError::PackageNotFound(reference.to_string()))
  }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => {
      return Err(StoreError::Read {
        path: path.display().to_string(),
        source,
      });
    }
  };
  serde_json::from_str(&content)
    .map(Some)
    .map_err(|source| StoreError::Parse {
      path: path.display().to_string(),
      source,
    })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
      path: parent.display().to_string(),
      source,
    })?;
  }

  let content = serde_json::to_string_pretty(value).map_err(StoreError::Serialize)?;
  let temp_path = path.with_extension("json.tmp");
  let write_err = |source| StoreError::Write {
    path: path.display().to_string(),
    source,
  };
  fs::write(&temp_path, content).map_err(write_err)?;
  fs::rename(&temp_path, path).map_err(write_err)
}
