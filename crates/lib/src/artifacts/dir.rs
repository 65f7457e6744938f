use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use walkdir::WalkDir;

use super::{ArtifactError, ArtifactSource, ContractArtifact, LinkReferences};

/// Reads compiler output from a directory.
///
/// Both Foundry (`out/<File>.sol/<Name>.json`, bytecode as an object) and
/// Hardhat (`artifacts/**/<Name>.json`, bytecode as a string) layouts are
/// understood. Debug and build-info files are skipped.
pub struct ArtifactDir {
  root: PathBuf,
}

impl ArtifactDir {
  pub fn new(root: impl AsRef<Path>) -> Self {
    let root = root.as_ref();
    Self {
      root: dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf()),
    }
  }

  fn find(&self, name: &str) -> Option<PathBuf> {
    let file_name = format!("{}.json", name);
    WalkDir::new(&self.root)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| e.file_name() != "build-info")
      .filter_map(Result::ok)
      .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == file_name)
      .map(|e| e.into_path())
  }
}

/// Convert one compiler output document into an artifact.
pub(crate) fn parse_compiler_output(name: &str, path: &Path, doc: &Value) -> Result<ContractArtifact, ArtifactError> {
  let parse_err = |message: &str| ArtifactError::Parse {
    path: path.display().to_string(),
    message: message.to_string(),
  };

  let abi = doc.get("abi").cloned().ok_or_else(|| parse_err("missing abi"))?;

  let (bytecode, links) = match doc.get("bytecode") {
    Some(Value::String(code)) => (code.clone(), doc.get("linkReferences").cloned()),
    Some(Value::Object(obj)) => (
      obj
        .get("object")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_err("missing bytecode.object"))?
        .to_string(),
      obj.get("linkReferences").cloned(),
    ),
    _ => return Err(parse_err("missing bytecode")),
  };
  let bytecode = if bytecode.starts_with("0x") {
    bytecode
  } else {
    format!("0x{}", bytecode)
  };

  let link_references: LinkReferences = match links {
    Some(value) => serde_json::from_value(value).map_err(|e| parse_err(&e.to_string()))?,
    None => LinkReferences::new(),
  };

  let source_name = doc
    .get("sourceName")
    .and_then(Value::as_str)
    .map(str::to_string)
    .or_else(|| {
      doc
        .pointer("/metadata/settings/compilationTarget")
        .and_then(Value::as_object)
        .and_then(|targets| targets.keys().next().cloned())
    })
    .or_else(|| doc.pointer("/ast/absolutePath").and_then(Value::as_str).map(str::to_string))
    .or_else(|| {
      path
        .parent()
        .and_then(Path::file_name)
        .map(|p| p.to_string_lossy().into_owned())
    })
    .unwrap_or_default();

  let contract_name = doc
    .get("contractName")
    .and_then(Value::as_str)
    .unwrap_or(name)
    .to_string();

  Ok(ContractArtifact {
    contract_name,
    source_name,
    abi,
    bytecode,
    link_references,
  })
}

#[async_trait]
impl ArtifactSource for ArtifactDir {
  async fn get_artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
    let path = self.find(name).ok_or_else(|| ArtifactError::NotFound {
      name: name.to_string(),
      searched: self.root.display().to_string(),
    })?;

    let content = std::fs::read_to_string(&path).map_err(|e| ArtifactError::Read {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    let doc: Value = serde_json::from_str(&content).map_err(|e| ArtifactError::Parse {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;

    parse_compiler_output(name, &path, &doc)
  }
}
