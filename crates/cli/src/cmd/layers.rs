//! Implementation of the `cannon layers` command.
//!
//! Prints how the actions of a cannonfile group into state layers, in the
//! order a layered build visits them.

use std::path::Path;

use anyhow::{Context, Result};

use cannon_lib::graph::ChainDefinition;

use super::load_cannonfile;
use crate::output::{print_json, symbols};

pub fn cmd_layers(path: &Path, json: bool) -> Result<()> {
  let raw = load_cannonfile(path)?;
  let def = ChainDefinition::parse(raw).context("Invalid cannonfile")?;
  let layers = def.state_layers();

  if json {
    return print_json(layers);
  }

  for key in layers.dependency_order() {
    let Some(layer) = layers.get(&key) else { continue };
    if layer.depends.is_empty() {
      println!("{}", key);
    } else {
      println!("{} {} {}", key, symbols::BUILT_ON, layer.depends.join(", "));
    }
    for action in &layer.actions {
      println!("  {} {}", symbols::INFO, action);
    }
  }
  Ok(())
}
