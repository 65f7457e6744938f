//! Implementation of the `cannon outputs` command.

use std::path::Path;

use anyhow::{Context, Result};

use cannon_lib::build::get_outputs;

use super::{open_store, variant_key};
use crate::VariantArgs;
use crate::output::{print_info, print_json};

/// Print the merged outputs of a stored deployment as JSON.
pub fn cmd_outputs(package: &str, variant: &VariantArgs, store_dir: Option<&Path>) -> Result<()> {
  let key = variant_key(package, variant)?;
  let store = open_store(store_dir);

  match get_outputs(&store, &key).with_context(|| format!("Failed to read outputs of {}", key))? {
    Some(outputs) => print_json(&outputs),
    None => {
      print_info(&format!("No deployment found for {}", key));
      Ok(())
    }
  }
}
