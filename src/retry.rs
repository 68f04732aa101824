//! Retry with exponential backoff for transient service errors.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::cancel::CancelFlag;
use crate::error::{ClientError, StepError};

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts including the first one. `1` disables retrying.
  pub max_attempts: u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_backoff_ms: 200,
      max_backoff_ms: 5_000,
    }
  }
}

impl RetryPolicy {
  pub fn no_retry() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  /// Delay before attempt `attempt + 1` (1-based `attempt`), jittered to 50..=100% of the cap.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let cap = self
      .initial_backoff_ms
      .saturating_mul(1u64 << exp)
      .min(self.max_backoff_ms);
    if cap == 0 {
      return Duration::ZERO;
    }
    let jittered = rand::thread_rng().gen_range(cap / 2..=cap);
    Duration::from_millis(jittered)
  }
}

/// Runs `op` until it succeeds, fails permanently, runs out of attempts, or the run is cancelled.
///
/// Only [ClientError::Transient] is retried. Cancellation is checked before every attempt, so
/// a cancel request never waits for the whole retry budget.
pub async fn retry_transient<T, F, Fut>(
  policy: RetryPolicy,
  cancel: &CancelFlag,
  what: &str,
  mut op: F,
) -> Result<T, StepError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, ClientError>>,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempt = 1;
  loop {
    cancel.check()?;
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_transient() && attempt < max_attempts => {
        let delay = policy.backoff(attempt);
        warn!(
          operation = what,
          attempt,
          max_attempts,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "transient failure, retrying"
        );
        tokio::select! {
          _ = tokio::time::sleep(delay) => {}
          _ = cancel.cancelled() => return Err(StepError::Cancelled),
        }
        attempt += 1;
      }
      Err(e) => return Err(e.into()),
    }
  }
}
