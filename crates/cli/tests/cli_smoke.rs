//! CLI smoke tests for cannon.
//!
//! These tests run every command against a temporary store and check exit
//! codes and output. None of them needs a running node.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// A temporary directory holding a cannonfile and an isolated store.
struct TestEnv {
  temp: TempDir,
}

impl TestEnv {
  fn with_cannonfile(content: &str) -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("cannonfile.toml"), content).unwrap();
    Self { temp }
  }

  fn cannonfile(&self) -> std::path::PathBuf {
    self.temp.path().join("cannonfile.toml")
  }

  fn store(&self) -> std::path::PathBuf {
    let p = self.temp.path().join("store");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  fn cannon(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("cannon");
    cmd.env("CANNON_DIRECTORY", self.store());
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

const VALID: &str = r#"
name = "token"
version = "1.0.0"

[setting.supply]
defaultValue = "1000"

[contract.Token]
artifact = "Token"
args = ["<%= settings.supply %>"]

[invoke.mint]
target = "Token"
func = "mint"
args = [5]
depends = ["contract.Token"]
"#;

const CYCLIC: &str = r#"
name = "broken"
version = "1.0.0"

[contract.A]
artifact = "Token"
depends = ["contract.B"]

[contract.B]
artifact = "Token"
depends = ["contract.A"]
"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  cargo_bin_cmd!("cannon")
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  cargo_bin_cmd!("cannon")
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("cannon"));
}

// =============================================================================
// check / layers
// =============================================================================

#[test]
fn check_accepts_valid_cannonfile() {
  let env = TestEnv::with_cannonfile(VALID);
  env
    .cannon()
    .arg("check")
    .arg(env.cannonfile())
    .assert()
    .success()
    .stdout(predicate::str::contains("token:1.0.0 is valid (2 actions)"));
}

#[test]
fn check_reports_cycle() {
  let env = TestEnv::with_cannonfile(CYCLIC);
  env
    .cannon()
    .arg("check")
    .arg(env.cannonfile())
    .assert()
    .failure()
    .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn check_reports_unknown_dependency() {
  let env = TestEnv::with_cannonfile(
    r#"
name = "broken"
version = "1.0.0"

[contract.A]
artifact = "Token"
depends = ["contract.Missing"]
"#,
  );
  env
    .cannon()
    .arg("check")
    .arg(env.cannonfile())
    .assert()
    .failure()
    .stderr(predicate::str::contains("contract.Missing"));
}

#[test]
fn check_missing_file_fails() {
  let env = TestEnv::with_cannonfile(VALID);
  env
    .cannon()
    .arg("check")
    .arg(env.temp.path().join("nope.toml"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load cannonfile"));
}

#[test]
fn layers_lists_each_action() {
  let env = TestEnv::with_cannonfile(VALID);
  env
    .cannon()
    .arg("layers")
    .arg(env.cannonfile())
    .assert()
    .success()
    .stdout(predicate::str::contains("contract.Token"))
    .stdout(predicate::str::contains("invoke.mint ⇐ contract.Token"));
}

#[test]
fn layers_json_is_parseable() {
  let env = TestEnv::with_cannonfile(VALID);
  let output = env
    .cannon()
    .arg("layers")
    .arg(env.cannonfile())
    .arg("--json")
    .output()
    .unwrap();
  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["layers"]["invoke.mint"]["depends"][0], "contract.Token");
}

// =============================================================================
// build / outputs / wipe
// =============================================================================

#[test]
fn build_without_node_fails_cleanly() {
  let env = TestEnv::with_cannonfile(VALID);
  env
    .cannon()
    .arg("build")
    .arg(env.cannonfile())
    .args(["--rpc-url", "http://127.0.0.1:1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Build of token:1.0.0 failed"));
}

#[test]
fn build_rejects_malformed_setting() {
  let env = TestEnv::with_cannonfile(VALID);
  env
    .cannon()
    .arg("build")
    .arg(env.cannonfile())
    .args(["--setting", "supply"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("expected key=value"));
}

#[test]
fn build_rejects_unknown_read_mode() {
  let env = TestEnv::with_cannonfile(VALID);
  env
    .cannon()
    .arg("build")
    .arg(env.cannonfile())
    .args(["--read-mode", "sometimes"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("possible values: none, metadata, all"));
}

#[test]
fn outputs_of_unknown_deployment() {
  let env = TestEnv::with_cannonfile(VALID);
  env
    .cannon()
    .args(["outputs", "token:1.0.0", "--chain-id", "13370"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No deployment found"));
}

#[test]
fn outputs_rejects_bad_package_ref() {
  let env = TestEnv::with_cannonfile(VALID);
  env
    .cannon()
    .args(["outputs", "token", "--chain-id", "1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid package"));
}

#[test]
fn wipe_with_nothing_stored() {
  let env = TestEnv::with_cannonfile(VALID);
  env
    .cannon()
    .args(["wipe", "token:1.0.0", "--chain-id", "13370", "--force"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to wipe"));
}

#[test]
fn store_dir_flag_overrides_environment() {
  let env = TestEnv::with_cannonfile(VALID);
  let other = env.temp.path().join("elsewhere");
  env
    .cannon()
    .arg("--store-dir")
    .arg(&other)
    .arg("build")
    .arg(env.cannonfile())
    .args(["--rpc-url", "http://127.0.0.1:1"])
    .assert()
    .failure();
  assert!(other.join("token").join("1.0.0").exists());
}
