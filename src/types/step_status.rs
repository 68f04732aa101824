//! Lifecycle status of a step inside one run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a step inside one run.
///
/// `Pending -> Running -> {Succeeded | Failed | Skipped | Cancelled}`. A step that never left
/// `Pending` because the run aborted is recorded as `Cancelled`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Skipped,
  Cancelled,
}

impl StepStatus {
  /// True once the step can no longer change status.
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
    )
  }

  /// True when dependents of this step may start (and its weight counts as progress).
  pub fn satisfies_dependents(self) -> bool {
    matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
  }

  /// Whether moving from `self` to `next` is a legal lifecycle transition.
  pub fn can_transition_to(self, next: StepStatus) -> bool {
    match self {
      StepStatus::Pending => matches!(
        next,
        StepStatus::Running | StepStatus::Skipped | StepStatus::Cancelled
      ),
      StepStatus::Running => next.is_terminal(),
      _ => false,
    }
  }
}

impl fmt::Display for StepStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StepStatus::Pending => write!(f, "pending"),
      StepStatus::Running => write!(f, "running"),
      StepStatus::Succeeded => write!(f, "succeeded"),
      StepStatus::Failed => write!(f, "failed"),
      StepStatus::Skipped => write!(f, "skipped"),
      StepStatus::Cancelled => write!(f, "cancelled"),
    }
  }
}
