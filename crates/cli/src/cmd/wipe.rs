//! Implementation of the `cannon wipe` command.
//!
//! Removes the action records and layer states of one deployment so the next
//! build executes everything. The stored cannonfile is kept.

use std::path::Path;

use anyhow::{Context, Result};

use super::{open_store, variant_key};
use crate::VariantArgs;
use crate::output::{print_info, print_success};
use crate::prompts::confirm_wipe;

pub fn cmd_wipe(package: &str, variant: &VariantArgs, store_dir: Option<&Path>, force: bool) -> Result<()> {
  let key = variant_key(package, variant)?;
  let store = open_store(store_dir);

  let Some(variant) = store.read_variant(&key).context("Failed to read store")? else {
    print_info(&format!("Nothing to wipe for {}", key));
    return Ok(());
  };

  if !confirm_wipe(&key, variant.records.len(), force)? {
    print_info("Aborted");
    return Ok(());
  }

  store.wipe(&key).with_context(|| format!("Failed to wipe {}", key))?;
  print_success(&format!("Wiped {}", key));
  Ok(())
}
