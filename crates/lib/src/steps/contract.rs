//! `contract`: deploy a contract from a compiled artifact.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{
  Step, StepCall, StepError, StepOutput, fingerprint_of, parse_address, parse_config, parse_value, submit, validate_as,
};
use crate::abi::{encode_deploy, format_address, parse_abi};
use crate::artifacts::ContractArtifact;
use crate::chain::{Bytes, TransactionInput, TransactionRequest, TxKind};
use crate::context::{BuildContext, ContractInfo};
use crate::util::hash::Fingerprint;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContractConfig {
  /// Contract name to look up in the artifact source.
  pub artifact: String,
  #[serde(default)]
  pub args: Vec<Value>,
  /// Library name to deployed address.
  #[serde(default)]
  pub libraries: BTreeMap<String, String>,
  #[serde(default)]
  pub from: Option<String>,
  #[serde(default)]
  pub value: Option<String>,
  /// Varies the default signer so the same artifact can be deployed twice.
  #[serde(default)]
  pub salt: Option<String>,
  /// Record the ABI of these artifacts instead of the deployed one's (proxies).
  #[serde(default)]
  pub abi_of: Vec<String>,
}

pub struct ContractStep;

impl ContractStep {
  async fn artifact(call: &StepCall<'_>, config: &ContractConfig) -> Result<ContractArtifact, StepError> {
    Ok(call.builder.artifacts().get_artifact(&config.artifact).await?)
  }

  /// ABI recorded in the context: the artifact's own, or the concatenation of `abiOf`.
  async fn recorded_abi(call: &StepCall<'_>, config: &ContractConfig, artifact: &ContractArtifact) -> Result<Value, StepError> {
    if config.abi_of.is_empty() {
      return Ok(artifact.abi.clone());
    }
    let mut entries = Vec::new();
    for name in &config.abi_of {
      let other = call.builder.artifacts().get_artifact(name).await?;
      if let Value::Array(items) = other.abi {
        entries.extend(items);
      }
    }
    Ok(Value::Array(entries))
  }
}

#[async_trait]
impl Step for ContractStep {
  fn validate(&self, config: &Value) -> Result<(), String> {
    let config: ContractConfig = validate_as(config)?;
    if config.artifact.is_empty() {
      return Err("`artifact` must not be empty".to_string());
    }
    Ok(())
  }

  async fn get_state(
    &self,
    call: &StepCall<'_>,
    _ctx: &BuildContext,
    config: &Value,
  ) -> Result<Option<Fingerprint>, StepError> {
    let parsed: ContractConfig = parse_config(config)?;
    let artifact = Self::artifact(call, &parsed).await?;
    let state = json!({
      "config": config,
      "bytecode": artifact.bytecode,
      "abi": artifact.abi,
    });
    Ok(Some(fingerprint_of(&state)?))
  }

  async fn exec(&self, call: &StepCall<'_>, ctx: &BuildContext, config: &Value) -> Result<StepOutput, StepError> {
    let config: ContractConfig = parse_config(config)?;
    let artifact = Self::artifact(call, &config).await?;
    let chain = call.builder.chain();

    for library in artifact.required_libraries() {
      let address = config.libraries.get(library).ok_or_else(|| StepError::MissingLibrary {
        library: library.to_string(),
        contract: artifact.contract_name.clone(),
      })?;
      let code = chain.get_code(parse_address(address)?).await?;
      if code.is_empty() {
        return Err(StepError::LibraryNotDeployed {
          library: library.to_string(),
          address: address.clone(),
        });
      }
    }
    let bytecode = artifact.link(&config.libraries)?;

    let contract = parse_abi(&artifact.abi)?;
    let data = encode_deploy(&contract, &bytecode, &config.args)?;

    let intent = TransactionRequest {
      to: Some(TxKind::Create),
      input: TransactionInput::new(Bytes::from(data)),
      value: config.value.as_deref().map(parse_value).transpose()?,
      ..Default::default()
    };
    let signer = match &config.from {
      Some(from) => call.builder.signers().get_signer(parse_address(from)?).await?,
      None => {
        let salt = config.salt.as_deref().unwrap_or_default();
        call.builder.signers().get_default_signer(&intent, salt).await?
      }
    };
    debug!(action = %call.action_name(), signer = %signer.address, "deploying {}", artifact.contract_name);

    let receipt = submit(
      call,
      ctx,
      TransactionRequest {
        from: Some(signer.address),
        ..intent
      },
    )
    .await?;
    let address = receipt.contract_address.ok_or(StepError::NoContractAddress {
      hash: receipt.transaction_hash,
    })?;

    info!(action = %call.action_name(), address = %address, "deployed {}", artifact.contract_name);

    let info = ContractInfo {
      address: format_address(address),
      abi: Self::recorded_abi(call, &config, &artifact).await?,
      constructor_args: config.args.clone(),
      deploy_txn_hash: receipt.transaction_hash.to_string(),
      source_name: artifact.source_name.clone(),
      contract_name: artifact.contract_name.clone(),
      deployed_on: call.action_name(),
    };

    let mut output = StepOutput::default();
    output.contracts.insert(call.action.label.clone(), info);
    Ok(output)
  }
}
