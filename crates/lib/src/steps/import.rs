//! `import`: build another package as a sub-build and expose its outputs.
//!
//! The sub-build's context lands under `imports.<label>`, so its contracts
//! are addressed as `label.Name` by later actions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::{Step, StepCall, StepError, StepOutput, fingerprint_of, parse_config, validate_as};
use crate::build::{BuildOptions, ReadMode, WriteMode};
use crate::consts::DEFAULT_PRESET;
use crate::context::BuildContext;
use crate::store::parse_package_ref;
use crate::template;
use crate::util::hash::Fingerprint;

fn default_preset() -> String {
  DEFAULT_PRESET.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportConfig {
  /// `name:version` of the imported package.
  pub source: String,
  #[serde(default = "default_preset")]
  pub preset: String,
  /// Settings passed to the sub-build.
  #[serde(default)]
  pub options: BTreeMap<String, String>,
}

/// A package that must be available before a definition can build.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ImportRequirement {
  pub source: String,
  pub preset: String,
}

/// Packages an import action needs, resolved before execution.
///
/// Only `source` is templated; the rest of the configuration may reference
/// outputs that do not exist yet.
pub fn get_required_imports(ctx: &BuildContext, config: &Value) -> Result<Vec<ImportRequirement>, StepError> {
  let source = config
    .get("source")
    .and_then(Value::as_str)
    .ok_or_else(|| StepError::InvalidConfig("`source` must be a string".to_string()))?;
  let source = template::render(source, &ctx.to_value())?;
  let preset = config
    .get("preset")
    .and_then(Value::as_str)
    .unwrap_or(DEFAULT_PRESET)
    .to_string();
  Ok(vec![ImportRequirement { source, preset }])
}

pub struct ImportStep;

#[async_trait]
impl Step for ImportStep {
  fn validate(&self, config: &Value) -> Result<(), String> {
    let config: ImportConfig = validate_as(config)?;
    if !config.source.contains("<%") {
      parse_package_ref(&config.source).map_err(|e| e.to_string())?;
    }
    Ok(())
  }

  async fn get_state(
    &self,
    call: &StepCall<'_>,
    _ctx: &BuildContext,
    config: &Value,
  ) -> Result<Option<Fingerprint>, StepError> {
    let parsed: ImportConfig = parse_config(config)?;
    let def = call.builder.packages().load_definition(&parsed.source).await?;
    Ok(Some(fingerprint_of(&json!({
      "config": config,
      "def": def,
    }))?))
  }

  async fn exec(&self, call: &StepCall<'_>, ctx: &BuildContext, config: &Value) -> Result<StepOutput, StepError> {
    let config: ImportConfig = parse_config(config)?;

    if call.import_stack.contains(&config.source) {
      let mut cycle = call.import_stack.to_vec();
      cycle.push(config.source.clone());
      return Err(StepError::ImportCycle(cycle));
    }

    let raw = call.builder.packages().load_definition(&config.source).await?;
    let options = BuildOptions {
      chain_id: Some(ctx.chain_id),
      preset: config.preset.clone(),
      settings: config.options.clone(),
      read: if call.fresh_state { ReadMode::None } else { ReadMode::Metadata },
      write: WriteMode::Metadata,
    };

    let mut stack = call.import_stack.to_vec();
    stack.push(config.source.clone());

    info!(action = %call.action_name(), source = %config.source, preset = %config.preset, "building import");
    let outcome = call
      .builder
      .build_nested(raw, &options, &stack)
      .await
      .map_err(|e| StepError::Import(Box::new(e)))?;

    let mut output = StepOutput::default();
    output.imports.insert(call.action.label.clone(), outcome.context);
    Ok(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn preset_defaults_to_main() {
    let config: ImportConfig = serde_json::from_value(json!({"source": "dep:1.0.0"})).unwrap();
    assert_eq!(config.preset, "main");
    assert!(config.options.is_empty());
  }

  #[test]
  fn validate_checks_package_ref() {
    assert!(ImportStep.validate(&json!({"source": "dep:1.0.0"})).is_ok());
    assert!(ImportStep.validate(&json!({"source": "dep"})).is_err());
    assert!(ImportStep.validate(&json!({"source": "<%= settings.dep %>"})).is_ok());
  }

  #[test]
  fn required_imports_template_only_source() {
    let mut ctx = BuildContext::default();
    ctx.settings.insert("dep".into(), "token:2.0.0".into());
    let config = json!({
      "source": "<%= settings.dep %>",
      "preset": "other",
      "options": {"owner": "<%= contracts.Missing.address %>"}
    });
    assert_eq!(
      get_required_imports(&ctx, &config).unwrap(),
      vec![ImportRequirement {
        source: "token:2.0.0".into(),
        preset: "other".into()
      }]
    );
  }
}
