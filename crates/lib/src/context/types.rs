use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Package identity carried in every context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMeta {
  pub name: String,
  pub version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// A deployed contract known to the build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
  pub address: String,
  #[serde(default)]
  pub abi: Value,
  #[serde(default)]
  pub constructor_args: Vec<Value>,
  #[serde(default)]
  pub deploy_txn_hash: String,
  #[serde(default)]
  pub source_name: String,
  #[serde(default)]
  pub contract_name: String,
  /// Action that produced this entry.
  #[serde(default)]
  pub deployed_on: String,
}

/// One decoded event occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
  pub args: Vec<Value>,
}

/// A transaction sent by the build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
  pub hash: String,
  #[serde(default)]
  pub events: BTreeMap<String, Vec<EventInfo>>,
  #[serde(default)]
  pub deployed_on: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub signer: Option<String>,
}

/// Everything a build knows at one point of its execution.
///
/// Contexts are never mutated once stored as an action's output; successors
/// receive merged copies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildContext {
  pub package: PackageMeta,
  pub chain_id: u64,
  /// Seconds since the Unix epoch.
  pub timestamp: u64,
  #[serde(default)]
  pub settings: BTreeMap<String, String>,
  #[serde(default)]
  pub contracts: BTreeMap<String, ContractInfo>,
  #[serde(default)]
  pub txns: BTreeMap<String, TransactionInfo>,
  #[serde(default)]
  pub imports: BTreeMap<String, BuildContext>,
}

impl BuildContext {
  pub fn new(package: PackageMeta, chain_id: u64, timestamp: u64, settings: BTreeMap<String, String>) -> Self {
    Self {
      package,
      chain_id,
      timestamp,
      settings,
      ..Default::default()
    }
  }

  /// Serialized form used for template lookups.
  pub fn to_value(&self) -> Value {
    serde_json::to_value(self).unwrap_or(Value::Null)
  }

  /// Find a contract by `Name`, or `import.Name` for a contract of an imported package.
  ///
  /// Import paths nest, so `a.b.Name` walks two import levels.
  pub fn find_contract(&self, path: &str) -> Option<&ContractInfo> {
    match path.split_once('.') {
      None => self.contracts.get(path),
      Some((import, rest)) => self.imports.get(import)?.find_contract(rest),
    }
  }

  /// Every ABI known to this context, including nested imports, as `(name, abi)` pairs.
  pub fn all_abis(&self) -> Vec<(String, &Value)> {
    let mut out: Vec<(String, &Value)> = self.contracts.iter().map(|(n, c)| (n.clone(), &c.abi)).collect();
    for (label, import) in &self.imports {
      out.extend(
        import
          .all_abis()
          .into_iter()
          .map(|(name, abi)| (format!("{}.{}", label, name), abi)),
      );
    }
    out
  }

  /// Overlay another context's outputs onto this one; later entries win.
  pub fn overlay(&mut self, other: &BuildContext) {
    self
      .contracts
      .extend(other.contracts.iter().map(|(k, v)| (k.clone(), v.clone())));
    self.txns.extend(other.txns.iter().map(|(k, v)| (k.clone(), v.clone())));
    self.imports.extend(other.imports.iter().map(|(k, v)| (k.clone(), v.clone())));
  }
}
