//! Cooperative cancellation shared by the executor, its steps and the front end.
//!
//! Nothing is ever preempted: steps observe the flag at their own safe points
//! ([CancelFlag::check]) and the executor observes it at step boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::StepError;

/// Why a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
  /// The front end called `cancel`.
  Requested,
  /// The run's wall-clock watchdog expired.
  Watchdog,
}

impl fmt::Display for CancelReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CancelReason::Requested => write!(f, "cancellation requested"),
      CancelReason::Watchdog => write!(f, "run watchdog expired"),
    }
  }
}

/// Run-scoped `cancelRequested` flag. Cloning shares the flag; the first reason wins.
#[derive(Debug, Clone)]
pub struct CancelFlag {
  tx: Arc<watch::Sender<Option<CancelReason>>>,
}

impl Default for CancelFlag {
  fn default() -> Self {
    Self::new()
  }
}

impl CancelFlag {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(None);
    Self { tx: Arc::new(tx) }
  }

  /// Sets the flag and returns immediately. Returns false if it was already set.
  pub fn request(&self, reason: CancelReason) -> bool {
    self.tx.send_if_modified(|current| {
      if current.is_none() {
        *current = Some(reason);
        true
      } else {
        false
      }
    })
  }

  pub fn is_requested(&self) -> bool {
    self.tx.borrow().is_some()
  }

  pub fn reason(&self) -> Option<CancelReason> {
    *self.tx.borrow()
  }

  /// Safe point: `Err(StepError::Cancelled)` once cancellation has been requested.
  pub fn check(&self) -> Result<(), StepError> {
    if self.is_requested() {
      Err(StepError::Cancelled)
    } else {
      Ok(())
    }
  }

  /// Resolves once cancellation is requested, yielding the reason.
  pub async fn cancelled(&self) -> CancelReason {
    let mut rx = self.tx.subscribe();
    match rx.wait_for(Option::is_some).await {
      Ok(reason) => (*reason).unwrap_or(CancelReason::Requested),
      // The sender lives as long as `self`, so the channel cannot close while we wait.
      Err(_) => CancelReason::Requested,
    }
  }
}
