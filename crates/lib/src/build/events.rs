//! Build lifecycle events.
//!
//! Every evaluated action produces a [`BuildEvent::PreStep`] followed by
//! exactly one of [`BuildEvent::PostStep`] or [`BuildEvent::StepFailed`] for
//! the same action.

use tracing::{debug, error, info};

use super::ActionState;

#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
  PreStep { action: String },
  /// The action completed; `state` is `Done` or `Cached`.
  PostStep { action: String, state: ActionState },
  StepFailed { action: String, error: String },
  /// Every action of the layer was served from its records.
  LayerCached { layer: String },
  /// The layer was rebuilt on a reset chain; `tainted` when an ancestor forced it.
  LayerRebuilt { layer: String, tainted: bool },
}

impl BuildEvent {
  pub fn action(&self) -> Option<&str> {
    match self {
      BuildEvent::PreStep { action } | BuildEvent::PostStep { action, .. } | BuildEvent::StepFailed { action, .. } => {
        Some(action)
      }
      _ => None,
    }
  }
}

pub trait BuildObserver: Send + Sync {
  fn on_event(&self, event: &BuildEvent);
}

/// Turns events into log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BuildObserver for TracingObserver {
  fn on_event(&self, event: &BuildEvent) {
    match event {
      BuildEvent::PreStep { action } => debug!(action = %action, "starting"),
      BuildEvent::PostStep { action, state } => info!(action = %action, state = %state, "finished"),
      BuildEvent::StepFailed { action, error } => error!(action = %action, error = %error, "failed"),
      BuildEvent::LayerCached { layer } => info!(layer = %layer, "layer restored from cache"),
      BuildEvent::LayerRebuilt { layer, tainted } => info!(layer = %layer, tainted, "layer rebuilt"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tracing_test::traced_test;

  #[traced_test]
  #[test]
  fn tracing_observer_logs_fields() {
    TracingObserver.on_event(&BuildEvent::PostStep {
      action: "contract.Token".into(),
      state: ActionState::Cached,
    });
    assert!(logs_contain("contract.Token"));
    assert!(logs_contain("cached"));
  }

  #[test]
  fn layer_events_have_no_action() {
    assert_eq!(BuildEvent::LayerCached { layer: "a".into() }.action(), None);
    assert_eq!(
      BuildEvent::PreStep {
        action: "invoke.x".into()
      }
      .action(),
      Some("invoke.x")
    );
  }
}
