//! Implementation of the `cannon build` command.
//!
//! Builds a cannonfile against a JSON-RPC node, reusing stored records, and
//! prints what was executed and deployed.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use tracing::info;

use cannon_lib::artifacts::{ArtifactDir, CachedArtifacts};
use cannon_lib::build::{BuildOptions, Builder, ReadMode, WriteMode};
use cannon_lib::chain::JsonRpcChain;

use super::{load_cannonfile, open_store};
use crate::output::{format_duration, print_action, print_error, print_json, print_stat, print_success, symbols};

pub struct BuildArgs<'a> {
  pub cannonfile: &'a Path,
  pub rpc_url: &'a str,
  pub artifacts_dir: &'a Path,
  pub store_dir: Option<&'a Path>,
  pub chain_id: Option<u64>,
  pub preset: String,
  pub settings: &'a [String],
  pub read: ReadMode,
  pub write: WriteMode,
  pub json: bool,
  pub verbose: bool,
}

fn parse_settings(pairs: &[String]) -> Result<BTreeMap<String, String>> {
  pairs
    .iter()
    .map(|pair| match pair.split_once('=') {
      Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
      _ => Err(anyhow!("Invalid setting '{}': expected key=value", pair)),
    })
    .collect()
}

pub fn cmd_build(args: BuildArgs<'_>) -> Result<()> {
  let raw = load_cannonfile(args.cannonfile)?;
  let package = raw.package_ref();
  let options = BuildOptions {
    chain_id: args.chain_id,
    preset: args.preset,
    settings: parse_settings(args.settings)?,
    read: args.read,
    write: args.write,
  };

  let store = open_store(args.store_dir);
  let artifacts = CachedArtifacts::new(
    Arc::new(ArtifactDir::new(args.artifacts_dir)),
    store.root().join(".artifacts"),
  );
  let chain = JsonRpcChain::new(args.rpc_url).with_context(|| format!("Invalid RPC URL {}", args.rpc_url))?;
  let builder = Builder::new(Arc::new(chain), Arc::new(artifacts), store);

  info!(package = %package, rpc = args.rpc_url, "starting build");
  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = match rt.block_on(builder.build(raw, &options)) {
    Ok(outcome) => outcome,
    Err(e) => {
      print_error(&format!("{} ({})", e, e.category()));
      bail!("Build of {} failed", package);
    }
  };

  if args.json {
    return print_json(&outcome.context);
  }

  print_success(&format!("Built {} in {}", package, format_duration(started.elapsed())));
  print_stat("Executed", &outcome.executed().len().to_string());
  print_stat("Cached", &outcome.cached().len().to_string());

  if !outcome.context.contracts.is_empty() {
    println!();
    println!("Contracts:");
    for (name, contract) in &outcome.context.contracts {
      println!("  {} {} {}", symbols::INFO, name, contract.address);
    }
  }

  if args.verbose {
    println!();
    println!("Actions:");
    for action in &outcome.order {
      if let Some(state) = outcome.states.get(action) {
        print_action(action, *state);
      }
    }
  }

  Ok(())
}
