//! Tests for `Provisioner` and `RunHandle`.

use std::path::PathBuf;
use tokio_stream::StreamExt;

use crate::clients::{ServiceKind, SimulatedEnvironment};
use crate::config::ProvisionerConfig;
use crate::error::ProvisionError;
use crate::orchestrator::Provisioner;
use crate::run_state_io::{FileRunStateStore, RunStateStore};
use crate::types::{Capability, ProvisionSpec, RunEvent, RunStatus};

fn spec() -> ProvisionSpec {
  ProvisionSpec {
    project_name: "demo-shop".to_string(),
    owner: "acme".to_string(),
    template: "acme/storefront".to_string(),
    project_dir: PathBuf::from("/tmp/demo-shop"),
    capabilities: [Capability::HostedContent].into_iter().collect(),
    required_tools: vec!["git".to_string()],
    packages: vec!["cli".to_string()],
    mesh_sources: vec![],
  }
}

#[tokio::test]
async fn invalid_spec_fails_before_any_step() {
  let env = SimulatedEnvironment::new(["git"]);
  let provisioner = Provisioner::new(env.services(), ProvisionerConfig::default());
  let mut bad = spec();
  bad.project_name = "Not A Slug".to_string();
  bad.capabilities.insert(Capability::ApiMesh);

  let err = provisioner.provision(&bad).unwrap_err();
  match err {
    ProvisionError::InvalidSpecification(e) => assert_eq!(e.problems.len(), 2),
    other => panic!("unexpected error {other:?}"),
  }
  assert!(env.live_resources().is_empty());
  assert!(ServiceKind::ALL.iter().all(|k| env.service(*k).calls().is_empty()));
}

#[tokio::test]
async fn event_stream_ends_with_one_terminal_event() {
  let env = SimulatedEnvironment::new(["git"]);
  let provisioner = Provisioner::new(env.services(), ProvisionerConfig::default());
  let mut handle = provisioner.provision(&spec()).unwrap();
  let events: Vec<RunEvent> = handle.events().unwrap().collect().await;
  assert!(handle.events().is_none());
  let report = handle.wait().await.unwrap();

  assert_eq!(report.status, RunStatus::Succeeded);
  assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
  assert!(events.last().unwrap().is_terminal());
  assert!(
    events
      .iter()
      .filter_map(RunEvent::percentage)
      .collect::<Vec<_>>()
      .windows(2)
      .all(|w| w[0] <= w[1])
  );
}

#[tokio::test]
async fn cancel_returns_immediately_and_only_once() {
  let env = SimulatedEnvironment::new(["git"]);
  let provisioner = Provisioner::new(env.services(), ProvisionerConfig::default());
  let handle = provisioner.provision(&spec()).unwrap();
  assert!(provisioner.cancel(&handle));
  assert!(!provisioner.cancel(&handle));
  let report = handle.wait().await.unwrap();
  assert_eq!(report.status, RunStatus::Cancelled);
  assert!(env.live_resources().is_empty());
}

#[tokio::test]
async fn file_backed_run_state_is_cleared_on_completion() {
  let tmp = tempfile::tempdir().unwrap();
  let env = SimulatedEnvironment::new(["git"]);
  let config = ProvisionerConfig {
    state_dir: Some(tmp.path().to_path_buf()),
    ..ProvisionerConfig::default()
  };
  let provisioner = Provisioner::new(env.services(), config);
  let handle = provisioner.provision(&spec()).unwrap();
  let run_id = handle.run_id();
  let report = handle.wait().await.unwrap();
  assert!(report.succeeded());
  let store = FileRunStateStore::new(tmp.path());
  assert!(store.outstanding_runs().unwrap().is_empty());
  assert!(!store.run_dir(run_id).exists());
}
