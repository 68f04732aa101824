//! Tests for `DeferredValueRegistry`.

use crate::deferred::DeferredValueRegistry;
use crate::error::DeferredError;
use crate::run_state_io::{MemoryRunStateStore, RunStateStore};
use crate::types::DeferredState;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_pending, assert_ready_eq};
use uuid::Uuid;

fn registry() -> (DeferredValueRegistry, Arc<MemoryRunStateStore>) {
  let store = Arc::new(MemoryRunStateStore::new());
  (DeferredValueRegistry::new(Uuid::new_v4(), store.clone()), store)
}

#[test]
fn declare_is_idempotent() {
  let (reg, _) = registry();
  reg.declare("endpoint-url").unwrap();
  reg.declare("endpoint-url").unwrap();
  let entries = reg.entries();
  assert_eq!(entries.len(), 1);
  assert_eq!(entries[0].state, DeferredState::Unresolved);
  assert_eq!(entries[0].value, None);
}

#[test]
fn second_resolve_is_a_conflict_and_first_value_stays() {
  let (reg, _) = registry();
  reg.declare("endpoint-url").unwrap();
  reg
    .resolve("endpoint-url", "https://v1.example.com", "deploy")
    .unwrap();
  let err = reg
    .resolve("endpoint-url", "https://v2.example.com", "rogue")
    .unwrap_err();
  match err {
    DeferredError::AlreadyResolved(c) => {
      assert_eq!(c.key, "endpoint-url");
      assert_eq!(c.resolved_by, "deploy");
      assert_eq!(c.attempted_by, "rogue");
    }
    other => panic!("expected conflict, got {other:?}"),
  }
  assert_eq!(reg.get("endpoint-url").as_deref(), Some("https://v1.example.com"));
}

#[tokio::test]
async fn all_waiters_observe_the_first_value() {
  let (reg, _) = registry();
  reg.declare("k").unwrap();
  let mut waiters = Vec::new();
  for _ in 0..4 {
    let reg = reg.clone();
    waiters.push(tokio::spawn(async move { reg.await_value("k").await }));
  }
  tokio::time::sleep(Duration::from_millis(10)).await;
  reg.resolve("k", "v1", "a").unwrap();
  assert!(reg.resolve("k", "v2", "b").is_err());
  for w in waiters {
    assert_eq!(w.await.unwrap(), Ok("v1".to_string()));
  }
}

#[test]
fn await_blocks_until_resolution() {
  let (reg, _) = registry();
  reg.declare("endpoint-url").unwrap();
  let mut fut = tokio_test::task::spawn(reg.await_value("endpoint-url"));
  assert_pending!(fut.poll());
  assert_pending!(fut.poll());
  reg.resolve("endpoint-url", "https://mesh.example.com", "deploy").unwrap();
  assert!(fut.is_woken());
  assert_ready_eq!(fut.poll(), Ok("https://mesh.example.com".to_string()));
}

#[test]
fn await_on_resolved_key_is_ready() {
  let (reg, _) = registry();
  reg.resolve("k", "v", "s").unwrap();
  let mut fut = tokio_test::task::spawn(reg.await_value("k"));
  assert_ready_eq!(fut.poll(), Ok("v".to_string()));
}

#[test]
fn abandon_wakes_waiters_with_abandoned() {
  let (reg, _) = registry();
  let mut fut = tokio_test::task::spawn(reg.await_value("never"));
  assert_pending!(fut.poll());
  reg.abandon();
  assert_ready_eq!(
    fut.poll(),
    Err(DeferredError::Abandoned {
      key: "never".to_string()
    })
  );
}

#[test]
fn abandon_leaves_resolved_values_and_poisons_new_keys() {
  let (reg, _) = registry();
  reg.resolve("done", "v", "s").unwrap();
  reg.abandon();
  let mut done = tokio_test::task::spawn(reg.await_value("done"));
  assert_ready_eq!(done.poll(), Ok("v".to_string()));
  let mut late = tokio_test::task::spawn(reg.await_value("late"));
  assert_ready_eq!(
    late.poll(),
    Err(DeferredError::Abandoned {
      key: "late".to_string()
    })
  );
}

#[test]
fn mutations_are_persisted() {
  let (reg, store) = registry();
  reg.declare("a").unwrap();
  reg.declare("b").unwrap();
  reg.resolve("a", "1", "step-a").unwrap();
  let run_id = store.outstanding_runs().unwrap()[0];
  let snap = store.load_registry(run_id).unwrap().unwrap();
  assert_eq!(snap.entries.len(), 2);
  let a = snap.entries.iter().find(|e| e.key == "a").unwrap();
  assert_eq!(a.state, DeferredState::Resolved);
  assert_eq!(a.value.as_deref(), Some("1"));
  assert_eq!(a.resolved_by_step.as_deref(), Some("step-a"));
  let b = snap.entries.iter().find(|e| e.key == "b").unwrap();
  assert_eq!(b.state, DeferredState::Unresolved);
}

#[test]
fn resolved_values_only_lists_resolved_keys() {
  let (reg, _) = registry();
  reg.declare("a").unwrap();
  reg.resolve("b", "2", "s").unwrap();
  let values = reg.resolved_values();
  assert_eq!(values.len(), 1);
  assert_eq!(values.get("b").map(String::as_str), Some("2"));
}
