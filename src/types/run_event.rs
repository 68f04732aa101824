//! Events relayed to the front end: fine-grained progress plus one terminal event.

use serde::{Deserialize, Serialize};

use super::{ResourceLedgerEntry, RunStatus};
use crate::error::{CompensationError, ProvisionError};

/// Progress update emitted after every step transition and by steps at their own safe points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
  /// Weight-normalized completion, 0..=100. Never decreases within a run.
  pub percentage: u8,
  pub current_step_id: Option<String>,
  pub message: String,
}

/// Error payload for a run that did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
  /// Step whose failure decided the verdict. `None` for cancellations.
  pub failed_step: Option<String>,
  pub error: ProvisionError,
  /// Entries whose compensation itself failed; these need manual operator cleanup.
  pub manual_cleanup: Vec<CompensationError>,
  /// Entries successfully compensated during rollback, newest first.
  pub rolled_back: Vec<ResourceLedgerEntry>,
}

/// The single terminal event of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalEvent {
  pub status: RunStatus,
  pub error: Option<RunFailure>,
}

/// Event stream item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
  Progress(ProgressEvent),
  Terminal(TerminalEvent),
}

impl RunEvent {
  pub fn is_terminal(&self) -> bool {
    matches!(self, RunEvent::Terminal(_))
  }

  pub fn percentage(&self) -> Option<u8> {
    match self {
      RunEvent::Progress(p) => Some(p.percentage),
      RunEvent::Terminal(_) => None,
    }
  }
}
