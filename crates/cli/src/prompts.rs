//! Interactive confirmation for destructive commands.
//!
//! Only `cannon wipe` asks. Without a terminal on both stdin and stderr the
//! question cannot be asked, so `--force` is required.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};

use anyhow::{Result, bail};

fn wipe_question(deployment: &impl Display, records: usize) -> String {
  let plural = if records == 1 { "" } else { "s" };
  format!(
    "Wipe {} action record{} and the layer states of {}? The next build re-executes every action.",
    records, plural, deployment
  )
}

/// Ask before wiping a deployment; `force` answers yes without asking.
pub fn confirm_wipe(deployment: &impl Display, records: usize, force: bool) -> Result<bool> {
  if force {
    return Ok(true);
  }

  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Cannot confirm wiping {} in non-interactive mode. Use --force to proceed.", deployment);
  }

  write!(io::stderr(), "{} [y/N] ", wipe_question(deployment, records))?;
  io::stderr().flush()?;

  let mut input = String::new();
  io::stdin().read_line(&mut input)?;

  Ok(matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn question_counts_records() {
    assert_eq!(
      wipe_question(&"token:1.0.0", 1),
      "Wipe 1 action record and the layer states of token:1.0.0? The next build re-executes every action."
    );
    assert!(wipe_question(&"token:1.0.0", 3).starts_with("Wipe 3 action records"));
  }

  #[test]
  fn force_skips_the_question() {
    assert!(confirm_wipe(&"token:1.0.0", 2, true).unwrap());
  }
}
