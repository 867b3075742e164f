//! Install/activate state of one agent instance.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  /// Created, not yet installed
  Parsed,
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  Activated,
  /// Install failed; this instance will never activate
  Redundant,
}

/// Each lifecycle signal is acted on at most once.
#[derive(Debug, Clone)]
pub struct Lifecycle {
  phase: Phase,
  skip_waiting: bool,
}

impl Lifecycle {
  pub fn new(skip_waiting: bool) -> Self {
    Self::resume(Phase::Parsed, skip_waiting)
  }

  /// Pick up an instance whose earlier phases ran in another process.
  pub fn resume(phase: Phase, skip_waiting: bool) -> Self {
    Self {
      phase,
      skip_waiting,
    }
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn begin_install(&mut self) -> Result<()> {
    self.advance(Phase::Parsed, Phase::Installing)
  }

  /// Record the install result. Returns whether activation should follow
  /// right away.
  pub fn finish_install(&mut self, succeeded: bool) -> bool {
    if succeeded {
      self.phase = Phase::Installed;
      self.skip_waiting
    } else {
      self.phase = Phase::Redundant;
      false
    }
  }

  pub fn begin_activate(&mut self) -> Result<()> {
    self.advance(Phase::Installed, Phase::Activating)
  }

  pub fn finish_activate(&mut self) {
    self.phase = Phase::Activated;
  }

  /// Stop waiting for older instances. Returns whether this instance is
  /// installed and can activate now.
  pub fn skip_waiting(&mut self) -> bool {
    self.skip_waiting = true;
    self.phase == Phase::Installed
  }

  fn advance(&mut self, from: Phase, to: Phase) -> Result<()> {
    if self.phase != from {
      return Err(eyre!(
        "Cannot move to {:?} while {:?} (expected {:?})",
        to,
        self.phase,
        from
      ));
    }
    self.phase = to;
    Ok(())
  }
}
