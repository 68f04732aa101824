//! Tests for `OrphanSweeper`.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::{ServiceKind, SimulatedEnvironment, SimulatedService};
use crate::retry::RetryPolicy;
use crate::run_state_io::{MemoryRunStateStore, RunStateStore};
use crate::sweep::OrphanSweeper;
use crate::types::{LedgerSnapshot, ResourceLedgerEntry, ResourceType};

fn snapshot(run_id: Uuid, entries: &[(ResourceType, &str)]) -> LedgerSnapshot {
  LedgerSnapshot {
    run_id,
    updated_at: Utc::now(),
    entries: entries
      .iter()
      .map(|(t, id)| ResourceLedgerEntry::new(*t, *id, "crashed-step"))
      .collect(),
  }
}

#[tokio::test]
async fn sweep_deletes_orphans_and_clears_the_run() {
  let env = SimulatedEnvironment::new(Vec::<String>::new());
  env.service(ServiceKind::SourceControl).seed("source-control/demo-1");
  env.service(ServiceKind::ApiMesh).seed("api-mesh/demo-2");
  let store = Arc::new(MemoryRunStateStore::new());
  let run_id = Uuid::new_v4();
  store
    .save_ledger(&snapshot(
      run_id,
      &[
        (ResourceType::Repository, "source-control/demo-1"),
        (ResourceType::DeployedEndpoint, "api-mesh/demo-2"),
        // Never actually created remotely; counts as compensated.
        (ResourceType::HostedContentSite, "content-platform/demo-3"),
      ],
    ))
    .unwrap();

  let sweeper = OrphanSweeper::new(env.services(), store.clone(), RetryPolicy::no_retry());
  let report = sweeper.sweep().await.unwrap();

  assert_eq!(report.cleared_runs, vec![run_id]);
  let order: Vec<&str> = report.compensated.iter().map(|e| e.identifier.as_str()).collect();
  assert_eq!(
    order,
    vec!["content-platform/demo-3", "api-mesh/demo-2", "source-control/demo-1"]
  );
  assert!(report.manual_cleanup.is_empty());
  assert!(env.live_resources().is_empty());
  assert!(store.outstanding_runs().unwrap().is_empty());
}

#[tokio::test]
async fn partially_swept_ledgers_keep_only_what_remains() {
  let env = SimulatedEnvironment::new(Vec::<String>::new())
    .with_service(SimulatedService::new(ServiceKind::EdgeConfig).failing_deletes());
  env.service(ServiceKind::EdgeConfig).seed("edge-config/demo-1");
  env.service(ServiceKind::Workspace).seed("workspace/demo-2");
  let store = Arc::new(MemoryRunStateStore::new());
  let run_id = Uuid::new_v4();
  store
    .save_ledger(&snapshot(
      run_id,
      &[
        (ResourceType::EdgeConfigBinding, "edge-config/demo-1"),
        (ResourceType::LocalDirectory, "workspace/demo-2"),
      ],
    ))
    .unwrap();

  let sweeper = OrphanSweeper::new(env.services(), store.clone(), RetryPolicy::no_retry());
  let report = sweeper.sweep().await.unwrap();

  assert!(report.cleared_runs.is_empty());
  assert_eq!(report.compensated.len(), 1);
  assert_eq!(report.manual_cleanup.len(), 1);
  assert_eq!(store.outstanding_runs().unwrap(), vec![run_id]);
  let kept = store.load_ledger(run_id).unwrap().unwrap();
  assert_eq!(kept.entries.len(), 1);
  assert_eq!(kept.entries[0].identifier, "edge-config/demo-1");
}

#[tokio::test]
async fn nothing_outstanding_is_a_no_op() {
  let env = SimulatedEnvironment::new(Vec::<String>::new());
  let store = Arc::new(MemoryRunStateStore::new());
  let report = OrphanSweeper::new(env.services(), store, RetryPolicy::no_retry())
    .sweep()
    .await
    .unwrap();
  assert!(report.cleared_runs.is_empty());
  assert!(report.compensated.is_empty());
}
