use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// An action identity, `kind.label`.
pub type ActionName = String;

/// The closed set of action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
  Contract,
  Invoke,
  Import,
  Run,
  Keeper,
}

impl ActionKind {
  pub const ALL: [ActionKind; 5] = [
    ActionKind::Contract,
    ActionKind::Invoke,
    ActionKind::Import,
    ActionKind::Run,
    ActionKind::Keeper,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      ActionKind::Contract => "contract",
      ActionKind::Invoke => "invoke",
      ActionKind::Import => "import",
      ActionKind::Run => "run",
      ActionKind::Keeper => "keeper",
    }
  }
}

impl fmt::Display for ActionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ActionKind {
  type Err = DefinitionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ActionKind::ALL
      .into_iter()
      .find(|k| k.as_str() == s)
      .ok_or_else(|| DefinitionError::UnknownKind(s.to_string()))
  }
}

/// Errors raised while reading a cannonfile.
#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid cannonfile: {0}")]
  Toml(#[from] toml::de::Error),

  #[error("invalid definition json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("unknown action kind '{0}'")]
  UnknownKind(String),

  #[error("invalid action label '{label}' in [{kind}]: labels may only contain letters, digits, '_' and '-'")]
  InvalidLabel { kind: ActionKind, label: String },

  #[error("action '{0}' must be a table")]
  NotATable(String),

  #[error("action '{0}' has an invalid 'depends' field: expected a list of action names")]
  InvalidDepends(String),
}

/// A declared setting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default_value: Option<Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
  pub value_type: Option<String>,
}

impl SettingDef {
  /// The default value rendered as a setting string.
  pub fn default_string(&self) -> Option<String> {
    self.default_value.as_ref().map(|v| match v {
      Value::String(s) => s.clone(),
      other => other.to_string(),
    })
  }
}

/// The declarative input: a cannonfile as written.
///
/// Kind-specific configuration is kept as raw JSON until a step validates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDefinition {
  pub name: String,
  pub version: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub setting: BTreeMap<String, SettingDef>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub contract: BTreeMap<String, Value>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub invoke: BTreeMap<String, Value>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub import: BTreeMap<String, Value>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub run: BTreeMap<String, Value>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub keeper: BTreeMap<String, Value>,
}

impl RawDefinition {
  /// Parse a cannonfile from TOML source.
  pub fn from_toml_str(source: &str) -> Result<Self, DefinitionError> {
    Ok(toml::from_str(source)?)
  }

  /// Read a cannonfile from disk. `.json` files are parsed as JSON, anything else as TOML.
  pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
      path: path.display().to_string(),
      source,
    })?;

    if path.extension().is_some_and(|ext| ext == "json") {
      Ok(serde_json::from_str(&content)?)
    } else {
      Self::from_toml_str(&content)
    }
  }

  /// `name:version`, the locator other packages import this one by.
  pub fn package_ref(&self) -> String {
    format!("{}:{}", self.name, self.version)
  }

  fn section(&self, kind: ActionKind) -> &BTreeMap<String, Value> {
    match kind {
      ActionKind::Contract => &self.contract,
      ActionKind::Invoke => &self.invoke,
      ActionKind::Import => &self.import,
      ActionKind::Run => &self.run,
      ActionKind::Keeper => &self.keeper,
    }
  }

  /// Split every section into individual actions, sorted by identity.
  pub fn actions(&self) -> Result<Vec<Action>, DefinitionError> {
    let mut actions = Vec::new();
    for kind in ActionKind::ALL {
      for (label, raw) in self.section(kind) {
        actions.push(Action::from_raw(kind, label, raw)?);
      }
    }
    actions.sort_by_key(|a| a.name());
    Ok(actions)
  }
}

/// One named unit of work in the build graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
  pub kind: ActionKind,
  pub label: String,
  /// Identities of the actions this one depends on, as declared.
  pub depends: Vec<ActionName>,
  /// Kind-specific configuration with `depends` removed.
  pub config: Value,
}

impl Action {
  /// The action's identity, `kind.label`.
  pub fn name(&self) -> ActionName {
    format!("{}.{}", self.kind, self.label)
  }

  pub fn from_raw(kind: ActionKind, label: &str, raw: &Value) -> Result<Self, DefinitionError> {
    if !is_valid_label(label) {
      return Err(DefinitionError::InvalidLabel {
        kind,
        label: label.to_string(),
      });
    }

    let name = format!("{}.{}", kind, label);
    let Value::Object(map) = raw else {
      return Err(DefinitionError::NotATable(name));
    };

    let mut config = map.clone();
    let depends = match config.remove("depends") {
      None => Vec::new(),
      Some(Value::Array(items)) => items
        .into_iter()
        .map(|item| match item {
          Value::String(s) => Ok(s),
          _ => Err(DefinitionError::InvalidDepends(name.clone())),
        })
        .collect::<Result<Vec<_>, _>>()?,
      Some(_) => return Err(DefinitionError::InvalidDepends(name)),
    };

    Ok(Self {
      kind,
      label: label.to_string(),
      depends,
      config: Value::Object(config),
    })
  }
}

fn is_valid_label(label: &str) -> bool {
  !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Split `kind.label` into its parts.
pub fn split_name(name: &str) -> Option<(ActionKind, &str)> {
  let (kind, label) = name.split_once('.')?;
  Some((kind.parse().ok()?, label))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  const CANNONFILE: &str = r#"
name = "token"
version = "1.0.0"

[setting.supply]
defaultValue = "1000"

[contract.Token]
artifact = "Token"
args = ["<%= settings.supply %>"]

[invoke.mint]
target = ["Token"]
func = "mint"
depends = ["contract.Token"]
"#;

  #[test]
  fn parses_cannonfile_sections() {
    let def = RawDefinition::from_toml_str(CANNONFILE).unwrap();
    assert_eq!(def.package_ref(), "token:1.0.0");
    assert_eq!(def.setting["supply"].default_string().as_deref(), Some("1000"));

    let actions = def.actions().unwrap();
    let names: Vec<String> = actions.iter().map(Action::name).collect();
    assert_eq!(names, vec!["contract.Token", "invoke.mint"]);
    assert_eq!(actions[1].depends, vec!["contract.Token"]);
    assert!(actions[1].config.get("depends").is_none());
  }

  #[test]
  fn raw_definition_json_roundtrip() {
    let def = RawDefinition::from_toml_str(CANNONFILE).unwrap();
    let json = serde_json::to_string(&def).unwrap();
    let back: RawDefinition = serde_json::from_str(&json).unwrap();
    assert_eq!(def, back);
  }

  #[test]
  fn rejects_bad_label() {
    let result = Action::from_raw(ActionKind::Contract, "a.b", &json!({}));
    assert!(matches!(result, Err(DefinitionError::InvalidLabel { .. })));
  }

  #[test]
  fn rejects_non_list_depends() {
    let result = Action::from_raw(ActionKind::Invoke, "x", &json!({"depends": "contract.A"}));
    assert!(matches!(result, Err(DefinitionError::InvalidDepends(_))));
  }

  #[test]
  fn split_name_parses_kind() {
    assert_eq!(split_name("contract.Token"), Some((ActionKind::Contract, "Token")));
    assert_eq!(split_name("setting.x"), None);
    assert_eq!(split_name("nodot"), None);
  }

  #[test]
  fn numeric_default_renders_as_string() {
    let setting = SettingDef {
      default_value: Some(json!(42)),
      ..Default::default()
    };
    assert_eq!(setting.default_string().as_deref(), Some("42"));
  }
}
