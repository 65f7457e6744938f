//! `keeper`: register an off-chain automation rule.
//!
//! Keepers are run by external infrastructure; the build only validates and
//! records them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{Step, StepCall, StepError, StepOutput, fingerprint_of, parse_config, validate_as};
use crate::context::BuildContext;
use crate::util::hash::Fingerprint;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KeeperConfig {
  pub exec: String,
  #[serde(default)]
  pub args: Vec<Value>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

pub struct KeeperStep;

#[async_trait]
impl Step for KeeperStep {
  fn validate(&self, config: &Value) -> Result<(), String> {
    let config: KeeperConfig = validate_as(config)?;
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
    Ok(Some(fingerprint_of(config)?))
  }

  async fn exec(&self, call: &StepCall<'_>, _ctx: &BuildContext, config: &Value) -> Result<StepOutput, StepError> {
    let config: KeeperConfig = parse_config(config)?;
    info!(action = %call.action_name(), exec = %config.exec, args = config.args.len(), "registered keeper");
    Ok(StepOutput::default())
  }
}
