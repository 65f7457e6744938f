//! Fingerprints and content hashes.
//!
//! This module provides:
//! - `Fingerprint`: a 128-bit digest over canonical JSON, used as the staleness key of an action
//! - `ContentHash`: a full SHA-256 digest over file or directory contents
//! - `hash_path()`: hashes a file or a whole directory tree, used for `run` step inputs

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::consts::FINGERPRINT_HEX_LEN;

pub type HashError = serde_json::Error;

/// Digest of an action's resolved configuration.
///
/// Lowercase hex, 32 characters (the first 128 bits of a SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A full 64-character SHA-256 over raw content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Rebuild a JSON value with object keys in sorted order.
///
/// Serializing the result is stable regardless of how the map type orders entries.
pub fn canonicalize(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      let mut sorted = Map::new();
      for key in keys {
        sorted.insert(key.clone(), canonicalize(&map[key]));
      }
      Value::Object(sorted)
    }
    Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
    other => other.clone(),
  }
}

/// Compute the fingerprint of any serializable value.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<Fingerprint, HashError> {
  let canonical = canonicalize(&serde_json::to_value(value)?);
  let serialized = serde_json::to_string(&canonical)?;
  let digest = hash_bytes(serialized.as_bytes());
  Ok(Fingerprint(digest.0[..FINGERPRINT_HEX_LEN].to_string()))
}

/// Error while hashing files on disk.
#[derive(Debug, thiserror::Error)]
pub enum PathHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read {path}: {message}")]
  Read { path: String, message: String },

  #[error("path does not exist: {0}")]
  Missing(String),
}

/// Hash a file or a directory.
///
/// Directories hash their structure and file contents in path order; metadata
/// such as timestamps and permissions is ignored.
pub fn hash_path(path: &Path) -> Result<ContentHash, PathHashError> {
  if path.is_file() {
    hash_file(path)
  } else if path.is_dir() {
    hash_directory(path)
  } else {
    Err(PathHashError::Missing(path.display().to_string()))
  }
}

/// Compute a deterministic hash of a directory's contents.
pub fn hash_directory(path: &Path) -> Result<ContentHash, PathHashError> {
  let mut entries: Vec<String> = Vec::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry.map_err(|e| PathHashError::WalkDir { message: e.to_string() })?;
    let rel_path = entry
      .path()
      .strip_prefix(path)
      .unwrap_or(entry.path())
      .to_string_lossy()
      .replace('\\', "/");

    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    if file_type.is_file() {
      entries.push(format!("F:{}:{}", rel_path, hash_file(entry.path())?.0));
    } else if file_type.is_dir() {
      entries.push(format!("D:{}", rel_path));
    }
  }

  entries.sort();

  let mut hasher = Sha256::new();
  for entry in entries {
    hasher.update(entry.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, PathHashError> {
  let read_err = |e: std::io::Error| PathHashError::Read {
    path: path.display().to_string(),
    message: e.to_string(),
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::tempdir;

  #[test]
  fn fingerprint_is_128_bits() {
    let fp = fingerprint(&json!({"artifact": "Token"})).unwrap();
    assert_eq!(fp.0.len(), 32);
    assert!(fp.0.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn fingerprint_ignores_key_order() {
    let a = fingerprint(&json!({"a": 1, "b": {"x": true, "y": [1, 2]}})).unwrap();
    let b = fingerprint(&json!({"b": {"y": [1, 2], "x": true}, "a": 1})).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn fingerprint_changes_with_value() {
    let a = fingerprint(&json!({"args": ["1"]})).unwrap();
    let b = fingerprint(&json!({"args": ["2"]})).unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn hash_path_file_and_directory() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.txt"), "content a").unwrap();

    let file_hash = hash_path(&temp.path().join("a.txt")).unwrap();
    assert_eq!(file_hash, hash_file(&temp.path().join("a.txt")).unwrap());

    let dir1 = hash_path(temp.path()).unwrap();
    fs::write(temp.path().join("a.txt"), "changed").unwrap();
    let dir2 = hash_path(temp.path()).unwrap();
    assert_ne!(dir1, dir2);
  }

  #[test]
  fn hash_directory_tracks_structure() {
    let temp1 = tempdir().unwrap();
    fs::write(temp1.path().join("file.txt"), "content").unwrap();

    let temp2 = tempdir().unwrap();
    fs::create_dir(temp2.path().join("nested")).unwrap();
    fs::write(temp2.path().join("nested/file.txt"), "content").unwrap();

    assert_ne!(hash_directory(temp1.path()).unwrap(), hash_directory(temp2.path()).unwrap());
  }

  #[test]
  fn hash_path_missing() {
    let temp = tempdir().unwrap();
    let result = hash_path(&temp.path().join("nope"));
    assert!(matches!(result, Err(PathHashError::Missing(_))));
  }
}
