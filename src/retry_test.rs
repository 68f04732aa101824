//! Tests for transient retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::cancel::{CancelFlag, CancelReason};
use crate::error::{ClientError, StepError};
use crate::retry::{RetryPolicy, retry_transient};

fn fast(max_attempts: u32) -> RetryPolicy {
  RetryPolicy {
    max_attempts,
    initial_backoff_ms: 1,
    max_backoff_ms: 2,
  }
}

#[test]
fn backoff_grows_and_is_capped() {
  let policy = RetryPolicy {
    max_attempts: 10,
    initial_backoff_ms: 100,
    max_backoff_ms: 400,
  };
  let first = policy.backoff(1).as_millis();
  assert!((50..=100).contains(&first));
  let third = policy.backoff(3).as_millis();
  assert!((200..=400).contains(&third));
  let tenth = policy.backoff(10).as_millis();
  assert!((200..=400).contains(&tenth));
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
  let calls = Arc::new(AtomicU32::new(0));
  let c = Arc::clone(&calls);
  let out = retry_transient(fast(3), &CancelFlag::new(), "create", move || {
    let c = Arc::clone(&c);
    async move {
      if c.fetch_add(1, Ordering::SeqCst) < 2 {
        Err(ClientError::Transient("busy".into()))
      } else {
        Ok(7)
      }
    }
  })
  .await;
  assert_eq!(out, Ok(7));
  assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn attempts_are_bounded() {
  let calls = Arc::new(AtomicU32::new(0));
  let c = Arc::clone(&calls);
  let out: Result<(), StepError> = retry_transient(fast(2), &CancelFlag::new(), "create", move || {
    c.fetch_add(1, Ordering::SeqCst);
    async { Err(ClientError::Transient("busy".into())) }
  })
  .await;
  assert_eq!(out, Err(StepError::Client(ClientError::Transient("busy".into()))));
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
  let calls = Arc::new(AtomicU32::new(0));
  let c = Arc::clone(&calls);
  let out: Result<(), StepError> = retry_transient(fast(5), &CancelFlag::new(), "create", move || {
    c.fetch_add(1, Ordering::SeqCst);
    async { Err(ClientError::Permanent("quota".into())) }
  })
  .await;
  assert!(matches!(out, Err(StepError::Client(ClientError::Permanent(_)))));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_flag_stops_before_first_attempt() {
  let cancel = CancelFlag::new();
  cancel.request(CancelReason::Requested);
  let out: Result<(), StepError> =
    retry_transient(fast(5), &cancel, "create", || async { Ok(()) }).await;
  assert_eq!(out, Err(StepError::Cancelled));
}
