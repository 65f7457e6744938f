//! End-to-end checks of cannonfile parsing, validation and layering through
//! the public API.

use cannon_lib::action::{ActionKind, RawDefinition};
use cannon_lib::graph::{ChainDefinition, GraphProblem};
use cannon_lib::store::{DeploymentStore, PackageSource};
use tempfile::TempDir;

const PROTOCOL: &str = r#"
name = "protocol"
version = "2.1.0"
description = "token, vault and pools"

[setting.owner]
defaultValue = "0x0000000000000000000000000000000000000001"

[contract.Token]
artifact = "Token"
args = [1000]

[contract.Oracle]
artifact = "Oracle"

[contract.Vault]
artifact = "Vault"
args = ["<%= contracts.Token.address %>", "<%= contracts.Oracle.address %>"]
depends = ["contract.Token", "contract.Oracle"]

[invoke.setOwner]
target = "Vault"
func = "setOwner"
args = ["<%= settings.owner %>"]
depends = ["contract.Vault"]

[invoke.seedPool]
target = ["Vault"]
func = "seed"
depends = ["contract.Vault"]

[keeper.rebalance]
exec = "rebalance"
depends = ["invoke.seedPool"]
"#;

fn protocol() -> ChainDefinition {
  ChainDefinition::parse(RawDefinition::from_toml_str(PROTOCOL).unwrap()).unwrap()
}

#[test]
fn protocol_definition_is_valid() {
  let def = protocol();
  assert!(def.validate().is_empty());
  assert_eq!(def.len(), 6);
  assert_eq!(def.roots(), ["contract.Oracle", "contract.Token"]);
  assert_eq!(def.leaves(), ["invoke.setOwner", "keeper.rebalance"]);
  assert_eq!(def.action("keeper.rebalance").unwrap().kind, ActionKind::Keeper);
}

#[test]
fn every_action_lands_in_exactly_one_layer() {
  let def = protocol();
  let layers = def.state_layers();

  let mut seen: Vec<&str> = layers
    .iter()
    .flat_map(|(_, layer)| layer.actions.iter().map(String::as_str))
    .collect();
  seen.sort_unstable();
  let mut names: Vec<&str> = def.action_names().map(String::as_str).collect();
  names.sort_unstable();
  assert_eq!(seen, names);

  assert_ne!(
    layers.layer_of("contract.Oracle"),
    layers.layer_of("contract.Token")
  );
  // Both invokes hang off the Vault layer, so they are rebuilt together.
  assert_eq!(
    layers.layer_of("invoke.seedPool"),
    layers.layer_of("invoke.setOwner")
  );
  assert!(layers.is_acyclic());
}

#[test]
fn layer_order_respects_dependencies() {
  let def = protocol();
  let layers = def.state_layers();
  let order = layers.dependency_order();
  for (position, key) in order.iter().enumerate() {
    for dep in &layers.get(key).unwrap().depends {
      let dep_position = order.iter().position(|k| k == dep).unwrap();
      assert!(dep_position < position, "{dep} should precede {key}");
    }
  }
}

#[test]
fn problems_are_reported_together() {
  let source = r#"
name = "broken"
version = "0.1.0"

[contract.A]
artifact = "Token"
depends = ["contract.C"]

[contract.B]
artifact = "Token"
depends = ["contract.A"]

[contract.C]
artifact = "Token"
depends = ["contract.B"]

[invoke.call]
func = "go"
"#;
  let def = ChainDefinition::parse(RawDefinition::from_toml_str(source).unwrap()).unwrap();
  let problems = def.validate();
  assert!(problems.iter().any(|p| matches!(p, GraphProblem::Cycle(path) if !path.is_empty())));
  assert!(
    problems
      .iter()
      .any(|p| matches!(p, GraphProblem::Schema { action, .. } if action == "invoke.call"))
  );
}

#[tokio::test]
async fn stored_definitions_serve_imports() {
  let dir = TempDir::new().unwrap();
  let store = DeploymentStore::new(dir.path());
  let raw = RawDefinition::from_toml_str(PROTOCOL).unwrap();
  store.write_definition(&raw).unwrap();

  let loaded = store.load_definition("protocol:2.1.0").await.unwrap();
  assert_eq!(loaded, raw);
  assert!(store.load_definition("protocol:9.9.9").await.is_err());
  assert!(store.load_definition("protocol").await.is_err());
}
