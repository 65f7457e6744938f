mod build;
mod check;
mod layers;
mod outputs;
mod wipe;

use std::path::Path;

use anyhow::{Context, Result};

use cannon_lib::action::RawDefinition;
use cannon_lib::store::{DeploymentStore, VariantKey, parse_package_ref};

use crate::VariantArgs;

pub use build::{BuildArgs, cmd_build};
pub use check::cmd_check;
pub use layers::cmd_layers;
pub use outputs::cmd_outputs;
pub use wipe::cmd_wipe;

fn open_store(store_dir: Option<&Path>) -> DeploymentStore {
  match store_dir {
    Some(dir) => DeploymentStore::new(dir),
    None => DeploymentStore::default_store(),
  }
}

fn load_cannonfile(path: &Path) -> Result<RawDefinition> {
  RawDefinition::from_file(path).with_context(|| format!("Failed to load cannonfile: {}", path.display()))
}

fn variant_key(package: &str, variant: &VariantArgs) -> Result<VariantKey> {
  let (name, version) = parse_package_ref(package).context("Invalid package")?;
  Ok(VariantKey::new(name, version, variant.chain_id, &variant.preset))
}
