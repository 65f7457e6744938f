use std::fmt;

use thiserror::Error;

use crate::chain::ChainError;
use crate::graph::{GraphError, GraphProblem};
use crate::steps::StepError;
use crate::store::StoreError;
use crate::template::TemplateError;

/// Broad class of a build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
  /// The definition is malformed; nothing was executed.
  Validation,
  /// Settings or templates could not be resolved.
  Config,
  /// An on-chain operation failed.
  Execution,
  /// Outputs, stored data or the chain disagree with the build.
  Consistency,
  /// The orchestrator reached a state validation should have prevented.
  Invariant,
}

impl fmt::Display for ErrorCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ErrorCategory::Validation => "validation error",
      ErrorCategory::Config => "configuration error",
      ErrorCategory::Execution => "execution error",
      ErrorCategory::Consistency => "consistency error",
      ErrorCategory::Invariant => "invariant violation",
    };
    f.write_str(s)
  }
}

fn format_problems(problems: &[GraphProblem]) -> String {
  problems
    .iter()
    .map(|p| format!("  - {}", p))
    .collect::<Vec<_>>()
    .join("\n")
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("{package} has {} problem(s):\n{}", .problems.len(), format_problems(.problems))]
  Invalid { package: String, problems: Vec<GraphProblem> },

  #[error("setting '{setting}' has no value and no default")]
  MissingSetting { setting: String },

  #[error("{action}: {source}")]
  Template {
    action: String,
    #[source]
    source: TemplateError,
  },

  #[error("{action} failed: {source}")]
  Step {
    action: String,
    #[source]
    source: StepError,
  },

  #[error("{kind} '{name}' produced by {action} was already produced by {prior_action} ({prior_site})")]
  DuplicateLabel {
    kind: &'static str,
    name: String,
    action: String,
    prior_action: String,
    /// Address or transaction hash of the first entry.
    prior_site: String,
  },

  #[error("chain reports id {actual}, build expects {expected}")]
  ChainIdMismatch { expected: u64, actual: u64 },

  #[error("no stored state for layer {layer}")]
  MissingLayerState { layer: String },

  #[error("no progress: {} action(s) could not be scheduled: {}", .remaining.len(), .remaining.join(", "))]
  NoProgress { remaining: Vec<String> },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Chain(#[from] ChainError),
}

impl BuildError {
  pub fn category(&self) -> ErrorCategory {
    match self {
      BuildError::Graph(_) | BuildError::Invalid { .. } => ErrorCategory::Validation,
      BuildError::MissingSetting { .. } | BuildError::Template { .. } => ErrorCategory::Config,
      BuildError::Step { source, .. } => match source {
        StepError::Template(_) => ErrorCategory::Config,
        StepError::Import(inner) => inner.category(),
        StepError::Store(StoreError::IncompatibleFormat { .. }) => ErrorCategory::Consistency,
        _ => ErrorCategory::Execution,
      },
      BuildError::DuplicateLabel { .. } | BuildError::ChainIdMismatch { .. } | BuildError::MissingLayerState { .. } => {
        ErrorCategory::Consistency
      }
      BuildError::Store(StoreError::IncompatibleFormat { .. }) => ErrorCategory::Consistency,
      BuildError::Store(_) | BuildError::Chain(_) => ErrorCategory::Execution,
      BuildError::NoProgress { .. } => ErrorCategory::Invariant,
    }
  }

  pub(crate) fn step(action: &str, source: StepError) -> Self {
    match source {
      StepError::Template(source) => BuildError::Template {
        action: action.to_string(),
        source,
      },
      source => BuildError::Step {
        action: action.to_string(),
        source,
      },
    }
  }
}
