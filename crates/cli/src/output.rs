//! Terminal output for `cannon`.
//!
//! Build summaries, layer listings and action states go to stdout, failures to
//! stderr. Colour is applied only when the stream supports it; `--json` output
//! goes through [`print_json`] untouched.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use cannon_lib::build::ActionState;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
  /// Separates a layer from the layers it is built on.
  pub const BUILT_ON: &str = "⇐";
  pub const EXECUTED: &str = "+";
  pub const CACHED: &str = "=";
  pub const PENDING: &str = "·";
}

/// Marker for an action's final state in the build summary.
pub fn state_symbol(state: ActionState) -> &'static str {
  match state {
    ActionState::Done | ActionState::Executing => symbols::EXECUTED,
    ActionState::Cached => symbols::CACHED,
    ActionState::Failed => symbols::ERROR,
    ActionState::Pending => symbols::PENDING,
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One line of the per-action summary: executed green, reused dimmed.
pub fn print_action(action: &str, state: ActionState) {
  let symbol = state_symbol(state);
  match state {
    ActionState::Done | ActionState::Executing => println!(
      "  {} {}",
      symbol.if_supports_color(Stream::Stdout, |s| s.green()),
      action
    ),
    ActionState::Failed => println!(
      "  {} {}",
      symbol.if_supports_color(Stream::Stdout, |s| s.red()),
      action
    ),
    ActionState::Cached | ActionState::Pending => println!(
      "  {} {}",
      symbol,
      action.if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
