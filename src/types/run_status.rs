//! Executor state machine and terminal run status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Executor state for one run.
///
/// `NotStarted -> Running -> {Aborting | Cancelling} -> {Succeeded | Failed | Cancelled}`.
/// A run with no failure goes straight from `Running` to `Succeeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
  NotStarted,
  Running,
  Aborting,
  Cancelling,
  Succeeded,
  Failed,
  Cancelled,
}

impl ExecutorState {
  /// True while new steps may be dispatched.
  pub fn is_dispatching(self) -> bool {
    self == ExecutorState::Running
  }

  /// True once rollback has been decided (new dispatch stopped).
  pub fn is_winding_down(self) -> bool {
    matches!(self, ExecutorState::Aborting | ExecutorState::Cancelling)
  }

  /// Terminal status reached from this state once in-flight work and rollback are done.
  pub fn terminal(self) -> Option<RunStatus> {
    match self {
      ExecutorState::Running | ExecutorState::Succeeded => Some(RunStatus::Succeeded),
      ExecutorState::Aborting | ExecutorState::Failed => Some(RunStatus::Failed),
      ExecutorState::Cancelling | ExecutorState::Cancelled => Some(RunStatus::Cancelled),
      ExecutorState::NotStarted => None,
    }
  }
}

/// Status of a run as seen by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  Succeeded,
  Failed,
  Cancelled,
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunStatus::Running => write!(f, "running"),
      RunStatus::Succeeded => write!(f, "succeeded"),
      RunStatus::Failed => write!(f, "failed"),
      RunStatus::Cancelled => write!(f, "cancelled"),
    }
  }
}
