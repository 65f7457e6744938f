//! Step kinds.
//!
//! Every action kind is backed by a [`Step`] implementation exposing four
//! capabilities:
//!
//! - `validate`: check the raw configuration against the kind's schema
//! - `config_inject`: resolve template expressions against the build context
//! - `get_state`: fingerprint the resolved configuration for cache checks
//! - `exec`: perform the side effect and report produced contracts/transactions
//!
//! The set of kinds is closed; [`ActionKind::step`] maps each kind to its
//! implementation, so adding a kind is a compile-time exhaustive change.

mod contract;
mod import;
mod invoke;
mod keeper;
mod run;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::abi::AbiError;
use crate::action::{Action, ActionKind};
use crate::artifacts::ArtifactError;
use crate::build::{BuildError, Builder};
use crate::chain::{Address, B256, ChainError, TransactionReceipt, TransactionRequest, U256};
use crate::consts::FORCED_GAS_LIMIT;
use crate::context::{BuildContext, ContractInfo, TransactionInfo};
use crate::store::StoreError;
use crate::template::{self, TemplateError};
use crate::trace::{ExecutionFailure, explain_failure};
use crate::util::hash::Fingerprint;

pub use contract::{ContractConfig, ContractStep};
pub use import::{ImportConfig, ImportRequirement, ImportStep, get_required_imports};
pub use invoke::{FactoryConfig, FromCall, InvokeConfig, InvokeStep, OneOrMany};
pub use keeper::{KeeperConfig, KeeperStep};
pub use run::{RunConfig, RunHandler, RunStep};

#[derive(Debug, Error)]
pub enum StepError {
  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error(transparent)]
  Abi(#[from] AbiError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("library '{library}' required by {contract} has no address; add it to `libraries`")]
  MissingLibrary { library: String, contract: String },

  #[error("library '{library}' has no code deployed at {address}")]
  LibraryNotDeployed { library: String, address: String },

  #[error("contract '{name}' not found in context; known contracts: {}", .known.join(", "))]
  UnknownContract { name: String, known: Vec<String> },

  #[error("deployment transaction {hash} produced no contract address")]
  NoContractAddress { hash: B256 },

  #[error("invalid address '{value}': {message}")]
  InvalidAddress { value: String, message: String },

  #[error("invalid value '{value}': {message}")]
  InvalidValue { value: String, message: String },

  #[error("event '{event}' was not emitted by {action}; set allowEmptyEvents to accept this")]
  MissingEvent { event: String, action: String },

  #[error("event '{event}' has no address argument at index {arg}")]
  InvalidEventArg { event: String, arg: usize },

  #[error("no run handler named '{name}'; registered: {}", .known.join(", "))]
  UnknownRunHandler { name: String, known: Vec<String> },

  #[error("run handler '{name}' failed: {message}")]
  RunFailed { name: String, message: String },

  #[error("run handler '{name}' returned invalid output: {message}")]
  InvalidRunOutput { name: String, message: String },

  #[error("import cycle: {}", .0.join(" -> "))]
  ImportCycle(Vec<String>),

  #[error("failed to hash inputs: {0}")]
  Hash(String),

  #[error(transparent)]
  Chain(#[from] ChainError),

  #[error("{0}")]
  Execution(Box<ExecutionFailure>),

  #[error("import failed: {0}")]
  Import(Box<BuildError>),
}

/// What an action produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
  pub contracts: BTreeMap<String, ContractInfo>,
  pub txns: BTreeMap<String, TransactionInfo>,
  pub imports: BTreeMap<String, BuildContext>,
}

impl StepOutput {
  pub fn is_empty(&self) -> bool {
    self.contracts.is_empty() && self.txns.is_empty() && self.imports.is_empty()
  }
}

/// Per-invocation environment handed to a step.
pub struct StepCall<'a> {
  pub builder: &'a Builder,
  pub action: &'a Action,
  /// The chain was just reset for this action's layer.
  pub fresh_state: bool,
  /// Packages currently being built, outermost first.
  pub import_stack: &'a [String],
}

impl StepCall<'_> {
  pub fn action_name(&self) -> String {
    self.action.name()
  }
}

#[async_trait]
pub trait Step: Send + Sync {
  /// Check a raw configuration. Templates are not resolved yet.
  fn validate(&self, config: &Value) -> Result<(), String>;

  /// Resolve template expressions against the context.
  fn config_inject(&self, ctx: &BuildContext, config: &Value) -> Result<Value, StepError> {
    Ok(template::inject(config, &ctx.to_value())?)
  }

  /// Fingerprint of a resolved configuration. `None` opts the action out of caching.
  async fn get_state(
    &self,
    call: &StepCall<'_>,
    ctx: &BuildContext,
    config: &Value,
  ) -> Result<Option<Fingerprint>, StepError>;

  async fn exec(&self, call: &StepCall<'_>, ctx: &BuildContext, config: &Value) -> Result<StepOutput, StepError>;
}

impl ActionKind {
  /// The implementation behind this kind.
  pub fn step(self) -> &'static dyn Step {
    match self {
      ActionKind::Contract => &ContractStep,
      ActionKind::Invoke => &InvokeStep,
      ActionKind::Import => &ImportStep,
      ActionKind::Run => &RunStep,
      ActionKind::Keeper => &KeeperStep,
    }
  }
}

/// Deserialize a kind's configuration.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &Value) -> Result<T, StepError> {
  serde_json::from_value(config.clone()).map_err(|e| StepError::InvalidConfig(e.to_string()))
}

/// Schema check shared by every kind.
pub(crate) fn validate_as<T: DeserializeOwned>(config: &Value) -> Result<T, String> {
  serde_json::from_value(config.clone()).map_err(|e| e.to_string())
}

pub(crate) fn fingerprint_of(value: &Value) -> Result<Fingerprint, StepError> {
  crate::util::hash::fingerprint(value).map_err(|e| StepError::Hash(e.to_string()))
}

pub(crate) fn parse_address(value: &str) -> Result<Address, StepError> {
  value.trim().parse::<Address>().map_err(|e| StepError::InvalidAddress {
    value: value.to_string(),
    message: e.to_string(),
  })
}

/// Wei amount, decimal or `0x` hex.
pub(crate) fn parse_value(value: &str) -> Result<U256, StepError> {
  value.trim().parse::<U256>().map_err(|e| StepError::InvalidValue {
    value: value.to_string(),
    message: e.to_string(),
  })
}

/// Send a transaction, gathering diagnostics when it fails.
///
/// When gas estimation fails the transaction is forced through with a fixed
/// gas limit so the node can produce a trace of the revert.
pub(crate) async fn submit(
  call: &StepCall<'_>,
  ctx: &BuildContext,
  tx: TransactionRequest,
) -> Result<TransactionReceipt, StepError> {
  let chain = call.builder.chain();

  let gas = match chain.estimate_gas(&tx).await {
    Ok(gas) => gas,
    Err(error) => {
      warn!(action = %call.action_name(), error = %error, "gas estimation failed, forcing transaction for a trace");
      let forced = TransactionRequest {
        gas: Some(FORCED_GAS_LIMIT),
        ..tx
      };
      return match chain.send_transaction(&forced).await {
        Ok(receipt) if receipt.status => Ok(receipt),
        Ok(receipt) => Err(failure(explain_failure(chain, ctx, error, Some(receipt.transaction_hash)).await)),
        Err(_) => Err(failure(explain_failure(chain, ctx, error, None).await)),
      };
    }
  };

  let sized = TransactionRequest { gas: Some(gas), ..tx };
  match chain.send_transaction(&sized).await {
    Ok(receipt) if receipt.status => Ok(receipt),
    Ok(receipt) => {
      let hash = receipt.transaction_hash;
      Err(failure(explain_failure(chain, ctx, ChainError::Failed { hash }, Some(hash)).await))
    }
    Err(error) => Err(failure(explain_failure(chain, ctx, error, None).await)),
  }
}

fn failure(explained: ExecutionFailure) -> StepError {
  StepError::Execution(Box::new(explained))
}
