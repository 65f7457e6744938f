//! Implementation of the `cannon check` command.

use std::path::Path;

use anyhow::{Context, Result, bail};

use cannon_lib::graph::ChainDefinition;

use super::load_cannonfile;
use crate::output::{print_error, print_success};

/// Validate a cannonfile without touching a node or the store.
///
/// Every problem is printed; the command fails when there is at least one.
pub fn cmd_check(path: &Path) -> Result<()> {
  let raw = load_cannonfile(path)?;
  let package = raw.package_ref();
  let def = ChainDefinition::parse(raw).context("Invalid cannonfile")?;

  let problems = def.validate();
  if problems.is_empty() {
    print_success(&format!("{} is valid ({} actions)", package, def.len()));
    return Ok(());
  }

  for problem in &problems {
    print_error(&problem.to_string());
  }
  bail!("{} has {} problem(s)", package, problems.len())
}
