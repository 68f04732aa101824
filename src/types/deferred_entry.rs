//! Registry entry for a value declared before it is known.

use serde::{Deserialize, Serialize};

/// Whether a deferred value has been assigned yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredState {
  Unresolved,
  Resolved,
}

/// Registry entry for a deferred value. `value` and `resolved_by_step` are present only once
/// the entry is `Resolved`, after which the entry never changes for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEntry {
  pub key: String,
  pub state: DeferredState,
  pub value: Option<String>,
  pub resolved_by_step: Option<String>,
}

impl DeferredEntry {
  pub fn unresolved(key: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      state: DeferredState::Unresolved,
      value: None,
      resolved_by_step: None,
    }
  }

  pub fn is_resolved(&self) -> bool {
    self.state == DeferredState::Resolved
  }
}
