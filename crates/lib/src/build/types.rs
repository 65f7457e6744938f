use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_PRESET;
use crate::context::BuildContext;

/// How much persisted data a build trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
  /// Ignore the store; execute everything.
  None,
  /// Skip actions whose record fingerprint matches.
  #[default]
  Metadata,
  /// Also restore whole-chain layer states.
  All,
}

/// How much a build persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
  None,
  /// Action records only.
  #[default]
  Metadata,
  /// Action records and layer states.
  All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
  /// Expected chain id; `None` accepts whatever the chain reports.
  pub chain_id: Option<u64>,
  pub preset: String,
  /// Values for declared settings.
  pub settings: BTreeMap<String, String>,
  pub read: ReadMode,
  pub write: WriteMode,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      chain_id: None,
      preset: DEFAULT_PRESET.to_string(),
      settings: BTreeMap::new(),
      read: ReadMode::default(),
      write: WriteMode::default(),
    }
  }
}

impl BuildOptions {
  /// Whole-chain layer snapshots are used when either side asks for them.
  pub fn layered(&self) -> bool {
    self.read == ReadMode::All || self.write == WriteMode::All
  }
}

/// Where an action ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
  Pending,
  /// A persisted record matched; its output was reused.
  Cached,
  Executing,
  Done,
  Failed,
}

impl fmt::Display for ActionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ActionState::Pending => "pending",
      ActionState::Cached => "cached",
      ActionState::Executing => "executing",
      ActionState::Done => "done",
      ActionState::Failed => "failed",
    };
    f.write_str(s)
  }
}

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
  /// Merged outputs of the leaf actions.
  pub context: BuildContext,
  /// Final state of each action.
  pub states: BTreeMap<String, ActionState>,
  /// Actions in the order they were evaluated.
  pub order: Vec<String>,
}

impl BuildOutcome {
  pub fn executed(&self) -> Vec<&str> {
    self.with_state(ActionState::Done)
  }

  pub fn cached(&self) -> Vec<&str> {
    self.with_state(ActionState::Cached)
  }

  fn with_state(&self, state: ActionState) -> Vec<&str> {
    self
      .order
      .iter()
      .filter(|a| self.states.get(*a) == Some(&state))
      .map(String::as_str)
      .collect()
  }
}
