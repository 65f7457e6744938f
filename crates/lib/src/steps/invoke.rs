//! `invoke`: call a function on one or more deployed contracts.
//!
//! Each target produces one transaction entry, keyed by the action label when
//! there is a single target and `label_<n>` otherwise. Events in the receipts
//! are decoded against the ABIs known to the context. `factory` entries turn
//! events emitted by factory contracts into new contract entries.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::{
  Step, StepCall, StepError, StepOutput, fingerprint_of, parse_address, parse_config, parse_value, submit, validate_as,
};
use crate::abi::{decode_log, decode_output, encode_call, find_function, format_address, parse_abi};
use crate::chain::{Address, Bytes, Log, Signer, TransactionInput, TransactionRequest, TxKind};
use crate::context::{BuildContext, ContractInfo, EventInfo, TransactionInfo};
use crate::util::hash::Fingerprint;

/// A single value or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
  One(String),
  Many(Vec<String>),
}

impl OneOrMany {
  pub fn to_vec(&self) -> Vec<String> {
    match self {
      OneOrMany::One(one) => vec![one.clone()],
      OneOrMany::Many(many) => many.clone(),
    }
  }
}

/// Ask a contract which address should sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FromCall {
  pub func: String,
  #[serde(default)]
  pub args: Vec<Value>,
}

/// Register contracts created by a factory, found through an event argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FactoryConfig {
  pub event: String,
  /// Index of the event argument holding the new address.
  pub arg: usize,
  #[serde(default)]
  pub artifact: Option<String>,
  /// Take the ABI from a contract already in the context.
  #[serde(default)]
  pub abi_of: Option<String>,
  #[serde(default)]
  pub constructor_args: Vec<Value>,
  #[serde(default)]
  pub allow_empty_events: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InvokeConfig {
  pub target: OneOrMany,
  pub func: String,
  #[serde(default)]
  pub args: Vec<Value>,
  #[serde(default)]
  pub from: Option<String>,
  #[serde(default)]
  pub from_call: Option<FromCall>,
  #[serde(default)]
  pub value: Option<String>,
  #[serde(default)]
  pub factory: BTreeMap<String, FactoryConfig>,
}

pub struct InvokeStep;

fn unknown_contract(ctx: &BuildContext, name: &str) -> StepError {
  StepError::UnknownContract {
    name: name.to_string(),
    known: ctx.contracts.keys().cloned().collect(),
  }
}

/// Context contract deployed at `address`.
fn contract_at(ctx: &BuildContext, address: Address) -> Option<&ContractInfo> {
  ctx
    .contracts
    .values()
    .find(|c| c.address.parse::<Address>().ok() == Some(address))
}

fn decode_events(ctx: &BuildContext, fallback: &Value, logs: &[Log]) -> BTreeMap<String, Vec<EventInfo>> {
  let mut events: BTreeMap<String, Vec<EventInfo>> = BTreeMap::new();
  for log in logs {
    let abi = contract_at(ctx, log.address).map(|c| &c.abi).unwrap_or(fallback);
    let Ok(contract) = parse_abi(abi) else {
      continue;
    };
    if let Some((name, args)) = decode_log(&contract, log) {
      events.entry(name).or_default().push(EventInfo { args });
    }
  }
  events
}

impl InvokeStep {
  async fn signer_for(
    call: &StepCall<'_>,
    config: &InvokeConfig,
    target: &ContractInfo,
    intent: &TransactionRequest,
  ) -> Result<Signer, StepError> {
    let signers = call.builder.signers();
    if let Some(from) = &config.from {
      return Ok(signers.get_signer(parse_address(from)?).await?);
    }
    let Some(from_call) = &config.from_call else {
      return Ok(signers.get_default_signer(intent, "").await?);
    };

    let abi = parse_abi(&target.abi)?;
    let function = find_function(&abi, &from_call.func, from_call.args.len())?;
    let request = TransactionRequest {
      to: Some(TxKind::Call(parse_address(&target.address)?)),
      input: TransactionInput::new(Bytes::from(encode_call(function, &from_call.args)?)),
      ..Default::default()
    };
    let result = call.builder.chain().call(&request).await?;
    let address = decode_output(function, &result)?
      .into_iter()
      .next()
      .and_then(|v| v.as_str().map(str::to_string))
      .ok_or_else(|| {
        StepError::InvalidConfig(format!(
          "fromCall {} on {} did not return an address",
          from_call.func, target.address
        ))
      })?;
    Ok(signers.get_signer(parse_address(&address)?).await?)
  }

  async fn factory_contracts(
    call: &StepCall<'_>,
    ctx: &BuildContext,
    name: &str,
    factory: &FactoryConfig,
    emitted: &[(String, BTreeMap<String, Vec<EventInfo>>)],
  ) -> Result<Vec<(String, ContractInfo)>, StepError> {
    let (abi, source_name, contract_name) = match (&factory.artifact, &factory.abi_of) {
      (Some(artifact), _) => {
        let artifact = call.builder.artifacts().get_artifact(artifact).await?;
        (artifact.abi, artifact.source_name, artifact.contract_name)
      }
      (None, Some(abi_of)) => {
        let existing = ctx.find_contract(abi_of).ok_or_else(|| unknown_contract(ctx, abi_of))?;
        (
          existing.abi.clone(),
          existing.source_name.clone(),
          existing.contract_name.clone(),
        )
      }
      (None, None) => {
        return Err(StepError::InvalidConfig(format!(
          "factory '{}' needs `artifact` or `abiOf`",
          name
        )));
      }
    };

    let mut found = Vec::new();
    for (hash, events) in emitted {
      for event in events.get(&factory.event).into_iter().flatten() {
        let address = event
          .args
          .get(factory.arg)
          .and_then(Value::as_str)
          .ok_or_else(|| StepError::InvalidEventArg {
            event: factory.event.clone(),
            arg: factory.arg,
          })?;
        let key = if found.is_empty() {
          name.to_string()
        } else {
          format!("{}_{}", name, found.len())
        };
        found.push((
          key,
          ContractInfo {
            address: format_address(parse_address(address)?),
            abi: abi.clone(),
            constructor_args: factory.constructor_args.clone(),
            deploy_txn_hash: hash.clone(),
            source_name: source_name.clone(),
            contract_name: contract_name.clone(),
            deployed_on: call.action_name(),
          },
        ));
      }
    }

    if found.is_empty() && !factory.allow_empty_events {
      return Err(StepError::MissingEvent {
        event: factory.event.clone(),
        action: call.action_name(),
      });
    }
    Ok(found)
  }
}

#[async_trait]
impl Step for InvokeStep {
  fn validate(&self, config: &Value) -> Result<(), String> {
    let config: InvokeConfig = validate_as(config)?;
    if config.target.to_vec().is_empty() {
      return Err("`target` must name at least one contract".to_string());
    }
    if config.from.is_some() && config.from_call.is_some() {
      return Err("`from` and `fromCall` are mutually exclusive".to_string());
    }
    for (name, factory) in &config.factory {
      if factory.artifact.is_none() && factory.abi_of.is_none() {
        return Err(format!("factory '{}' needs `artifact` or `abiOf`", name));
      }
    }
    Ok(())
  }

  async fn get_state(
    &self,
    _call: &StepCall<'_>,
    ctx: &BuildContext,
    config: &Value,
  ) -> Result<Option<Fingerprint>, StepError> {
    let parsed: InvokeConfig = parse_config(config)?;
    let addresses: Vec<Option<String>> = parsed
      .target
      .to_vec()
      .iter()
      .map(|t| ctx.find_contract(t).map(|c| c.address.clone()))
      .collect();
    Ok(Some(fingerprint_of(&json!({
      "config": config,
      "targets": addresses,
    }))?))
  }

  async fn exec(&self, call: &StepCall<'_>, ctx: &BuildContext, config: &Value) -> Result<StepOutput, StepError> {
    let config: InvokeConfig = parse_config(config)?;
    let targets = config.target.to_vec();
    let label = &call.action.label;

    let mut output = StepOutput::default();
    let mut emitted = Vec::new();

    for (index, target) in targets.iter().enumerate() {
      let contract = ctx.find_contract(target).ok_or_else(|| unknown_contract(ctx, target))?;
      let abi = parse_abi(&contract.abi)?;
      let function = find_function(&abi, &config.func, config.args.len())?;

      let intent = TransactionRequest {
        to: Some(TxKind::Call(parse_address(&contract.address)?)),
        input: TransactionInput::new(Bytes::from(encode_call(function, &config.args)?)),
        value: config.value.as_deref().map(parse_value).transpose()?,
        ..Default::default()
      };
      let signer = Self::signer_for(call, &config, contract, &intent).await?;
      let receipt = submit(
        call,
        ctx,
        TransactionRequest {
          from: Some(signer.address),
          ..intent
        },
      )
      .await?;

      info!(
        action = %call.action_name(),
        target = %target,
        hash = %receipt.transaction_hash,
        "invoked {}",
        config.func
      );

      let events = decode_events(ctx, &contract.abi, &receipt.logs);
      let hash = receipt.transaction_hash.to_string();
      emitted.push((hash.clone(), events.clone()));

      let key = if targets.len() == 1 {
        label.clone()
      } else {
        format!("{}_{}", label, index)
      };
      output.txns.insert(
        key,
        TransactionInfo {
          hash,
          events,
          deployed_on: call.action_name(),
          signer: Some(format_address(signer.address)),
        },
      );
    }

    for (name, factory) in &config.factory {
      for (key, info) in Self::factory_contracts(call, ctx, name, factory, &emitted).await? {
        output.contracts.insert(key, info);
      }
    }

    Ok(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn target_accepts_one_or_many() {
    let one: InvokeConfig = serde_json::from_value(json!({"target": "A", "func": "f"})).unwrap();
    assert_eq!(one.target.to_vec(), vec!["A"]);
    let many: InvokeConfig = serde_json::from_value(json!({"target": ["A", "B"], "func": "f"})).unwrap();
    assert_eq!(many.target.to_vec(), vec!["A", "B"]);
  }

  #[test]
  fn validate_rejects_conflicting_signers() {
    let config = json!({"target": "A", "func": "f", "from": "0x01", "fromCall": {"func": "owner"}});
    assert!(InvokeStep.validate(&config).is_err());
  }

  #[test]
  fn validate_requires_factory_abi() {
    let config = json!({"target": "A", "func": "f", "factory": {"Pool": {"event": "Created", "arg": 0}}});
    assert!(InvokeStep.validate(&config).unwrap_err().contains("Pool"));
    let config = json!({"target": "A", "func": "f", "factory": {"Pool": {"event": "Created", "arg": 0, "artifact": "Pool"}}});
    assert!(InvokeStep.validate(&config).is_ok());
  }

  #[test]
  fn validate_rejects_empty_target_list() {
    assert!(InvokeStep.validate(&json!({"target": [], "func": "f"})).is_err());
  }
}
