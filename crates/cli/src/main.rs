mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use cannon_lib::build::{ReadMode, WriteMode};
use cannon_lib::consts::DEFAULT_PRESET;

use cmd::{cmd_build, cmd_check, cmd_layers, cmd_outputs, cmd_wipe};

/// cannon - build cannonfile deployments
#[derive(Parser)]
#[command(name = "cannon")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Store directory (defaults to $CANNON_DIRECTORY or ~/.local/share/cannon)
  #[arg(long, global = true)]
  store_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// How much of the store a build reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreMode {
  None,
  Metadata,
  All,
}

impl From<StoreMode> for ReadMode {
  fn from(mode: StoreMode) -> Self {
    match mode {
      StoreMode::None => ReadMode::None,
      StoreMode::Metadata => ReadMode::Metadata,
      StoreMode::All => ReadMode::All,
    }
  }
}

impl From<StoreMode> for WriteMode {
  fn from(mode: StoreMode) -> Self {
    match mode {
      StoreMode::None => WriteMode::None,
      StoreMode::Metadata => WriteMode::Metadata,
      StoreMode::All => WriteMode::All,
    }
  }
}

/// Options shared by commands that address one deployment.
#[derive(Args)]
pub struct VariantArgs {
  /// Chain id of the deployment
  #[arg(long)]
  pub chain_id: u64,

  /// Preset of the deployment
  #[arg(long, default_value = DEFAULT_PRESET)]
  pub preset: String,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a cannonfile against a node
  Build {
    /// Path to the cannonfile
    #[arg(default_value = "cannonfile.toml")]
    cannonfile: PathBuf,

    /// JSON-RPC endpoint of the node
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Directory holding compiler output
    #[arg(long, default_value = "out")]
    artifacts_dir: PathBuf,

    /// Expected chain id; the build fails if the node reports another
    #[arg(long)]
    chain_id: Option<u64>,

    #[arg(long, default_value = DEFAULT_PRESET)]
    preset: String,

    /// Setting value, as key=value (repeatable)
    #[arg(short, long = "setting", value_name = "KEY=VALUE")]
    settings: Vec<String>,

    /// Persisted data to trust
    #[arg(long, value_enum, ignore_case = true, default_value_t = StoreMode::Metadata)]
    read_mode: StoreMode,

    /// Data to persist
    #[arg(long, value_enum, ignore_case = true, default_value_t = StoreMode::Metadata)]
    write_mode: StoreMode,

    /// Print the merged outputs as JSON
    #[arg(long)]
    json: bool,
  },

  /// Validate a cannonfile and report every problem
  Check {
    #[arg(default_value = "cannonfile.toml")]
    cannonfile: PathBuf,
  },

  /// Show the state layers of a cannonfile
  Layers {
    #[arg(default_value = "cannonfile.toml")]
    cannonfile: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the stored outputs of a deployment
  Outputs {
    /// Package as name:version
    package: String,

    #[command(flatten)]
    variant: VariantArgs,
  },

  /// Forget the records and layer states of a deployment
  Wipe {
    /// Package as name:version
    package: String,

    #[command(flatten)]
    variant: VariantArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "info" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let store_dir = cli.store_dir.as_deref();
  match cli.command {
    Commands::Build {
      cannonfile,
      rpc_url,
      artifacts_dir,
      chain_id,
      preset,
      settings,
      read_mode,
      write_mode,
      json,
    } => cmd_build(cmd::BuildArgs {
      cannonfile: &cannonfile,
      rpc_url: &rpc_url,
      artifacts_dir: &artifacts_dir,
      store_dir,
      chain_id,
      preset,
      settings: &settings,
      read: read_mode.into(),
      write: write_mode.into(),
      json,
      verbose: cli.verbose,
    }),
    Commands::Check { cannonfile } => cmd_check(&cannonfile),
    Commands::Layers { cannonfile, json } => cmd_layers(&cannonfile, json),
    Commands::Outputs { package, variant } => cmd_outputs(&package, &variant, store_dir),
    Commands::Wipe {
      package,
      variant,
      force,
    } => cmd_wipe(&package, &variant, store_dir, force),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn store_modes_parse_case_insensitively() {
    let cli = Cli::try_parse_from(["cannon", "build", "--read-mode", "ALL", "--write-mode", "none"]).unwrap();
    let Commands::Build {
      read_mode, write_mode, ..
    } = cli.command
    else {
      panic!("expected build");
    };
    assert_eq!(ReadMode::from(read_mode), ReadMode::All);
    assert_eq!(WriteMode::from(write_mode), WriteMode::None);
    assert!(Cli::try_parse_from(["cannon", "build", "--read-mode", "some"]).is_err());
  }

  #[test]
  fn store_modes_default_to_metadata() {
    let cli = Cli::try_parse_from(["cannon", "build"]).unwrap();
    let Commands::Build {
      read_mode, write_mode, ..
    } = cli.command
    else {
      panic!("expected build");
    };
    assert_eq!(read_mode, StoreMode::Metadata);
    assert_eq!(write_mode, StoreMode::Metadata);
  }
}
