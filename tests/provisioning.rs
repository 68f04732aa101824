//! End-to-end provisioning runs against simulated services.

use demo_provisioner::clients::{ServiceKind, SimulatedEnvironment, SimulatedService};
use demo_provisioner::error::ProvisionError;
use demo_provisioner::retry::RetryPolicy;
use demo_provisioner::steps::{
  BIND_EDGE_CONFIG, COMMIT_PROJECT_CONFIG, CONTENT_SITE_URL, DEPLOY_API_MESH, ENDPOINT_URL,
  INSTALL_PACKAGES, PROJECT_CONFIG_SETTING, REPOSITORY_URL,
};
use demo_provisioner::types::{Capability, StepStatus};
use demo_provisioner::{
  CancelFlag, CancelReason, PrerequisitePlacement, ProvisionSpec, Provisioner, ProvisionerConfig,
  RunEvent, RunReport, RunStatus,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::StreamExt;

fn spec(capabilities: &[Capability]) -> ProvisionSpec {
  ProvisionSpec {
    project_name: "demo-shop".to_string(),
    owner: "acme".to_string(),
    template: "acme/storefront".to_string(),
    project_dir: PathBuf::from("/srv/demo-shop"),
    capabilities: capabilities.iter().copied().collect(),
    required_tools: vec!["git".to_string(), "node".to_string()],
    packages: vec!["cli".to_string(), "sdk".to_string(), "theme".to_string()],
    mesh_sources: vec!["catalog".to_string(), "checkout".to_string()],
  }
}

const ALL: [Capability; 3] = [
  Capability::HostedContent,
  Capability::EdgeDelivery,
  Capability::ApiMesh,
];

fn config() -> ProvisionerConfig {
  ProvisionerConfig {
    retry: RetryPolicy {
      max_attempts: 3,
      initial_backoff_ms: 1,
      max_backoff_ms: 2,
    },
    ..ProvisionerConfig::default()
  }
}

async fn run(
  env: &SimulatedEnvironment,
  config: ProvisionerConfig,
  spec: &ProvisionSpec,
) -> (RunReport, Vec<RunEvent>) {
  let provisioner = Provisioner::new(env.services(), config);
  let mut handle = provisioner.provision(spec).unwrap();
  let events: Vec<RunEvent> = handle.events().unwrap().collect().await;
  (handle.wait().await.unwrap(), events)
}

fn assert_monotonic_with_one_terminal(events: &[RunEvent]) {
  let percentages: Vec<u8> = events.iter().filter_map(RunEvent::percentage).collect();
  assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");
  assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
  assert!(events.last().is_some_and(RunEvent::is_terminal));
}

#[tokio::test]
async fn happy_path_provisions_everything_and_writes_the_artifact_once() {
  let env = SimulatedEnvironment::new(["git", "node", "cli"]);
  let (report, events) = run(&env, config(), &spec(&ALL)).await;

  assert!(report.succeeded(), "{:?}", report.error);
  assert_eq!(report.progress, 100);
  assert!(report.steps.values().all(|s| s.status == StepStatus::Succeeded));
  assert_monotonic_with_one_terminal(&events);

  // dir, repo, two packages, site, edge binding, endpoint.
  assert_eq!(report.ledger.len(), 7);
  assert_eq!(env.live_resources().len(), 7);
  assert_eq!(
    report.resolved.keys().map(String::as_str).collect::<Vec<_>>(),
    vec![CONTENT_SITE_URL, ENDPOINT_URL, REPOSITORY_URL]
  );

  let writes = env.artifacts.writes();
  assert_eq!(writes.len(), 1, "artifact written exactly once");
  let artifact: serde_json::Value = serde_json::from_str(&writes[0].1).unwrap();
  for (key, value) in &report.resolved {
    assert_eq!(artifact["endpoints"][key], value.as_str());
  }

  let repo = env.service(ServiceKind::SourceControl);
  let repo_id = &repo.live_resources()[0];
  let pushed = repo.settings(repo_id).unwrap();
  assert_eq!(pushed.get(PROJECT_CONFIG_SETTING), Some(&writes[0].1));
}

#[tokio::test]
async fn already_installed_packages_skip_the_install_step() {
  let env = SimulatedEnvironment::new(["git", "node", "cli", "sdk", "theme"]);
  let (report, _) = run(&env, config(), &spec(&[])).await;
  assert!(report.succeeded());
  assert_eq!(report.progress, 100);
  assert_eq!(report.step_status(INSTALL_PACKAGES), Some(StepStatus::Skipped));
  assert!(env.service(ServiceKind::PackageManager).calls().is_empty());
}

#[tokio::test]
async fn capability_steps_are_absent_when_not_requested() {
  let env = SimulatedEnvironment::new(["git", "node"]);
  let (report, _) = run(&env, config(), &spec(&[Capability::HostedContent])).await;
  assert!(report.succeeded());
  assert_eq!(report.step_status(BIND_EDGE_CONFIG), None);
  assert_eq!(report.step_status(DEPLOY_API_MESH), None);
  assert!(env.service(ServiceKind::ApiMesh).calls().is_empty());
}

#[tokio::test]
async fn late_failure_rolls_back_every_created_resource() {
  let env = SimulatedEnvironment::new(["git", "node"]).with_service(
    SimulatedService::new(ServiceKind::ApiMesh)
      .with_latency(Duration::from_millis(20))
      .failing_creates(),
  );
  let (report, events) = run(&env, config(), &spec(&ALL)).await;

  assert_eq!(report.status, RunStatus::Failed);
  assert!(report.progress < 100);
  assert_monotonic_with_one_terminal(&events);
  let failure = report.error.clone().unwrap();
  assert_eq!(failure.failed_step.as_deref(), Some(DEPLOY_API_MESH));
  assert!(matches!(failure.error, ProvisionError::StepExecution { .. }));
  assert!(failure.manual_cleanup.is_empty());
  assert_eq!(failure.rolled_back.len(), report.ledger.len());
  assert!(env.live_resources().is_empty(), "{:?}", env.live_resources());
  assert!(env.artifacts.writes().is_empty(), "no artifact for a failed run");
  assert_eq!(report.step_status(COMMIT_PROJECT_CONFIG), Some(StepStatus::Cancelled));
}

#[tokio::test]
async fn compensation_failure_is_isolated() {
  let env = SimulatedEnvironment::new(["git", "node"])
    .with_service(SimulatedService::new(ServiceKind::EdgeConfig).failing_deletes())
    .with_service(
      SimulatedService::new(ServiceKind::ApiMesh)
        .with_latency(Duration::from_millis(50))
        .failing_creates(),
    );
  let (report, _) = run(&env, config(), &spec(&ALL)).await;

  assert_eq!(report.status, RunStatus::Failed);
  assert_eq!(report.step_status(BIND_EDGE_CONFIG), Some(StepStatus::Succeeded));
  let failure = report.error.unwrap();
  assert_eq!(failure.manual_cleanup.len(), 1);
  let leftover = &failure.manual_cleanup[0].entry;
  assert_eq!(leftover.created_by_step, BIND_EDGE_CONFIG);
  // Everything ledgered before the binding was still compensated.
  assert_eq!(failure.rolled_back.len() + 1, report.ledger.len());
  assert_eq!(
    env.live_resources(),
    vec![(ServiceKind::EdgeConfig, leftover.identifier.clone())]
  );
}

#[tokio::test]
async fn cancellation_mid_run_rolls_back_and_reports_cancelled() {
  let slot: Arc<Mutex<Option<CancelFlag>>> = Arc::new(Mutex::new(None));
  let hook_slot = Arc::clone(&slot);
  let env = SimulatedEnvironment::new(["git", "node"]).with_service(
    SimulatedService::new(ServiceKind::ContentPlatform).on_create(move |_| {
      if let Some(cancel) = hook_slot.lock().unwrap().as_ref() {
        cancel.request(CancelReason::Requested);
      }
    }),
  );
  let provisioner = Provisioner::new(env.services(), config());
  let mut handle = provisioner.provision(&spec(&ALL)).unwrap();
  *slot.lock().unwrap() = Some(handle.cancel_flag());
  let events: Vec<RunEvent> = handle.events().unwrap().collect().await;
  let report = handle.wait().await.unwrap();

  assert_eq!(report.status, RunStatus::Cancelled);
  assert_monotonic_with_one_terminal(&events);
  assert_eq!(report.step_status(BIND_EDGE_CONFIG), Some(StepStatus::Cancelled));
  assert_eq!(
    report.error.unwrap().error,
    ProvisionError::Cancelled {
      reason: CancelReason::Requested
    }
  );
  assert!(env.live_resources().is_empty(), "{:?}", env.live_resources());
  assert!(env.artifacts.writes().is_empty());
}

#[tokio::test]
async fn transient_errors_are_retried_inside_the_step() {
  let env = SimulatedEnvironment::new(["git", "node"]).with_service(
    SimulatedService::new(ServiceKind::ContentPlatform).with_transient_failures(2),
  );
  let (report, _) = run(&env, config(), &spec(&[Capability::HostedContent])).await;
  assert!(report.succeeded(), "{:?}", report.error);
  assert_eq!(env.service(ServiceKind::ContentPlatform).calls().len(), 3);
}

#[tokio::test]
async fn missing_prerequisites_fail_before_anything_is_created() {
  let env = SimulatedEnvironment::new(["git"]);
  let (report, _) = run(&env, config(), &spec(&ALL)).await;
  assert_eq!(report.status, RunStatus::Failed);
  assert!(report.ledger.is_empty());
  assert!(env.live_resources().is_empty());
  let failure = report.error.unwrap();
  assert!(failure.error.to_string().contains("node"));
}

#[tokio::test]
async fn interleaved_prerequisites_let_remote_steps_start_early() {
  let env = SimulatedEnvironment::new(["git", "node"]);
  let config = ProvisionerConfig {
    prerequisites: PrerequisitePlacement::Interleaved,
    ..config()
  };
  let (report, _) = run(&env, config, &spec(&[Capability::ApiMesh])).await;
  assert!(report.succeeded(), "{:?}", report.error);
  assert_eq!(report.progress, 100);
}

#[tokio::test]
async fn invalid_spec_is_rejected_up_front() {
  let env = SimulatedEnvironment::new(["git"]);
  let provisioner = Provisioner::new(env.services(), config());
  let mut bad = spec(&[Capability::EdgeDelivery]);
  bad.packages.push("cli".to_string());
  match provisioner.provision(&bad) {
    Err(ProvisionError::InvalidSpecification(e)) => assert_eq!(e.problems.len(), 2),
    other => panic!("expected invalid specification, got {other:?}"),
  }
  assert!(env.live_resources().is_empty());
}
