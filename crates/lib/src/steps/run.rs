//! `run`: hand the context to caller-registered logic.
//!
//! Handlers are registered on the [`Builder`](crate::build::Builder) by name
//! and must return an object with `contracts` and/or `txns`.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::{Step, StepCall, StepError, StepOutput, fingerprint_of, parse_config, validate_as};
use crate::context::{BuildContext, ContractInfo, TransactionInfo};
use crate::util::hash::{Fingerprint, hash_path};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunConfig {
  /// Name of the registered handler.
  pub exec: String,
  #[serde(default)]
  pub args: Vec<Value>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  /// Files or directories whose contents decide whether the step reruns.
  #[serde(default)]
  pub modified: Vec<String>,
}

/// Out-of-band logic invoked by `run` actions.
#[async_trait]
pub trait RunHandler: Send + Sync {
  /// Returns `{ "contracts": {..}, "txns": {..} }`; either map may be omitted.
  async fn run(&self, ctx: &BuildContext, args: &[Value], env: &BTreeMap<String, String>) -> Result<Value, String>;
}

#[derive(Deserialize)]
struct RunResult {
  #[serde(default)]
  contracts: Option<BTreeMap<String, ContractInfo>>,
  #[serde(default)]
  txns: Option<BTreeMap<String, TransactionInfo>>,
}

fn parse_result(name: &str, value: Value, deployed_on: &str) -> Result<StepOutput, StepError> {
  let invalid = |message: String| StepError::InvalidRunOutput {
    name: name.to_string(),
    message,
  };
  if !value.is_object() {
    return Err(invalid(format!("expected an object, got {}", value)));
  }
  let result: RunResult = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
  if result.contracts.is_none() && result.txns.is_none() {
    return Err(invalid("result has neither `contracts` nor `txns`".to_string()));
  }

  let mut output = StepOutput {
    contracts: result.contracts.unwrap_or_default(),
    txns: result.txns.unwrap_or_default(),
    ..Default::default()
  };
  for contract in output.contracts.values_mut().filter(|c| c.deployed_on.is_empty()) {
    contract.deployed_on = deployed_on.to_string();
  }
  for txn in output.txns.values_mut().filter(|t| t.deployed_on.is_empty()) {
    txn.deployed_on = deployed_on.to_string();
  }
  Ok(output)
}

pub struct RunStep;

#[async_trait]
impl Step for RunStep {
  fn validate(&self, config: &Value) -> Result<(), String> {
    let config: RunConfig = validate_as(config)?;
    if config.exec.is_empty() {
      return Err("`exec` must not be empty".to_string());
    }
    Ok(())
  }

  async fn get_state(
    &self,
    _call: &StepCall<'_>,
    _ctx: &BuildContext,
    config: &Value,
  ) -> Result<Option<Fingerprint>, StepError> {
    let parsed: RunConfig = parse_config(config)?;
    if parsed.modified.is_empty() {
      return Ok(None);
    }

    let mut inputs = BTreeMap::new();
    for path in &parsed.modified {
      let hash = hash_path(Path::new(path)).map_err(|e| StepError::Hash(e.to_string()))?;
      inputs.insert(path.clone(), hash.0);
    }
    Ok(Some(fingerprint_of(&json!({
      "config": config,
      "inputs": inputs,
    }))?))
  }

  async fn exec(&self, call: &StepCall<'_>, ctx: &BuildContext, config: &Value) -> Result<StepOutput, StepError> {
    let config: RunConfig = parse_config(config)?;
    let handler = call
      .builder
      .run_handler(&config.exec)
      .ok_or_else(|| StepError::UnknownRunHandler {
        name: config.exec.clone(),
        known: call.builder.run_handler_names(),
      })?;

    info!(action = %call.action_name(), handler = %config.exec, "running");
    let result = handler
      .run(ctx, &config.args, &config.env)
      .await
      .map_err(|message| StepError::RunFailed {
        name: config.exec.clone(),
        message,
      })?;

    parse_result(&config.exec, result, &call.action_name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn result_must_carry_contracts_or_txns() {
    let err = parse_result("seed", json!({"other": 1}), "run.seed").unwrap_err();
    assert!(matches!(err, StepError::InvalidRunOutput { .. }));

    let err = parse_result("seed", json!("done"), "run.seed").unwrap_err();
    assert!(err.to_string().contains("expected an object"));
  }

  #[test]
  fn result_entries_are_attributed_to_action() {
    let output = parse_result(
      "seed",
      json!({"txns": {"seeded": {"hash": "0x01"}}}),
      "run.seed",
    )
    .unwrap();
    assert_eq!(output.txns["seeded"].deployed_on, "run.seed");
    assert!(output.contracts.is_empty());
  }

  #[test]
  fn malformed_contract_entry_is_invalid() {
    let err = parse_result("seed", json!({"contracts": {"A": {"abi": []}}}), "run.seed").unwrap_err();
    assert!(matches!(err, StepError::InvalidRunOutput { .. }));
  }
}
