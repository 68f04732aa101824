//! CLI: provision a demo project from a JSON request.
//!
//! Runs against simulated remote services; the project directory and the configuration
//! artifact are real files. Ctrl-C cancels the run and rolls back what was created.
//!
//! Usage: `provision [OPTIONS] <spec.json>`
//!
//! Set RUST_LOG=demo_provisioner=trace for span enter/exit and per-event tracing.

use clap::Parser;
use demo_provisioner::clients::{
  FsArtifactWriter, FsDirectoryService, ServiceKind, SimulatedEnvironment, SimulatedService,
};
use demo_provisioner::{
  OrphanSweeper, PrerequisitePlacement, ProvisionSpec, Provisioner, ProvisionerConfig, RunEvent,
  load_config,
};
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Provision a demo project from a JSON request.
#[derive(Parser, Debug)]
#[command(name = "provision")]
#[command(
  after_help = r#"Environment variables (override flags and the config file when set):
  PROVISION_STATE_DIR       Root for persisted run state (ledger.json / registry.json per run).
  PROVISION_WATCHDOG_SECS   Wall-clock limit for the whole run.
  PROVISION_MAX_RETRIES     Attempts per external call, including the first.
  PROVISION_PREREQUISITES   upfront | interleaved

Examples:
  provision demo.json
  provision --state-dir .provision --sweep demo.json
  provision --fail-step api-mesh demo.json"#
)]
struct Args {
  /// JSON config file. Flags and environment variables override its values.
  #[arg(long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Root for persisted run state. Default: in memory.
  #[arg(long, value_name = "DIR")]
  state_dir: Option<PathBuf>,

  /// Wall-clock limit for the whole run, in seconds.
  #[arg(long, value_name = "N")]
  watchdog_secs: Option<u64>,

  /// Whether every step waits for the prerequisite check.
  #[arg(long, value_name = "upfront|interleaved")]
  prerequisites: Option<PrerequisitePlacement>,

  /// Make every create call to this simulated service fail (demonstrates rollback).
  #[arg(long, value_name = "SERVICE")]
  fail_step: Option<ServiceKind>,

  /// Latency of each simulated remote call, in milliseconds.
  #[arg(long, value_name = "MS", default_value_t = 300)]
  latency_ms: u64,

  /// Compensate resources left behind by crashed runs before provisioning.
  #[arg(long)]
  sweep: bool,

  /// Path to the provisioning request
  #[arg(value_name = "spec.json")]
  spec_path: PathBuf,
}

fn fail(message: impl std::fmt::Display) -> ! {
  eprintln!("Error: {message}");
  process::exit(1);
}

fn resolve_config(args: &Args) -> ProvisionerConfig {
  let mut config = match &args.config {
    Some(path) => load_config(path)
      .unwrap_or_else(|e| fail(format!("reading config {}: {e}", path.display()))),
    None => ProvisionerConfig::default(),
  };
  if let Some(dir) = &args.state_dir {
    config.state_dir = Some(dir.clone());
  }
  if let Some(secs) = args.watchdog_secs {
    config.watchdog_secs = Some(secs);
  }
  if let Some(placement) = args.prerequisites {
    config.prerequisites = placement;
  }
  // Env vars override flags.
  config
    .with_env_overrides()
    .unwrap_or_else(|e| fail(format!("environment: {e}")))
}

fn environment(args: &Args, spec: &ProvisionSpec) -> SimulatedEnvironment {
  let latency = Duration::from_millis(args.latency_ms);
  let mut env = SimulatedEnvironment::new(spec.required_tools.iter().cloned());
  for kind in ServiceKind::ALL {
    let mut service = SimulatedService::new(kind).with_latency(latency);
    if args.fail_step == Some(kind) {
      service = service.failing_creates();
    }
    env = env.with_service(service);
  }
  env
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    .init();

  let args = Args::parse();
  let config = resolve_config(&args);
  info!(?config, "options (config file, flags, env)");

  let path = &args.spec_path;
  let raw = fs::read_to_string(path)
    .unwrap_or_else(|e| fail(format!("reading {}: {e}", path.display())));
  let spec: ProvisionSpec = serde_json::from_str(&raw)
    .unwrap_or_else(|e| fail(format!("parsing {}: {e}", path.display())));

  let env = environment(&args, &spec);
  let mut services = env.services();
  services.workspace = Arc::new(FsDirectoryService);
  services.artifacts = Arc::new(FsArtifactWriter);
  let provisioner = Provisioner::new(services.clone(), config.clone());

  if args.sweep {
    let sweeper = OrphanSweeper::new(services, provisioner.store(), config.retry);
    match sweeper.sweep().await {
      Ok(report) => {
        println!(
          "Sweep: {} run(s) cleared, {} resource(s) compensated, {} need manual cleanup.",
          report.cleared_runs.len(),
          report.compensated.len(),
          report.manual_cleanup.len()
        );
        for item in &report.manual_cleanup {
          println!("  manual cleanup: {item}");
        }
      }
      Err(e) => fail(format!("sweep: {e}")),
    }
  }

  let mut handle = provisioner
    .provision(&spec)
    .unwrap_or_else(|e| fail(e));
  println!("Run {} started.", handle.run_id());
  let Some(mut events) = handle.events() else {
    fail("event stream unavailable");
  };

  let mut cancelled = false;
  loop {
    tokio::select! {
      event = events.next() => match event {
        Some(RunEvent::Progress(p)) => {
          let step = p.current_step_id.as_deref().unwrap_or("-");
          println!("[{:>3}%] {step}: {}", p.percentage, p.message);
        }
        Some(RunEvent::Terminal(t)) => println!("Run {}.", t.status),
        None => break,
      },
      _ = tokio::signal::ctrl_c(), if !cancelled => {
        cancelled = true;
        eprintln!("Cancelling; rolling back created resources...");
        provisioner.cancel(&handle);
      }
    }
  }

  let report = handle
    .wait()
    .await
    .unwrap_or_else(|e| fail(format!("run task: {e}")));
  info!(status = %report.status, progress = report.progress, "provisioning finished");
  println!("  Status: {}", report.status);
  println!("  Progress: {}%", report.progress);
  for (key, value) in &report.resolved {
    println!("  {key}: {value}");
  }
  if let Some(failure) = &report.error {
    println!("  Error: {}", failure.error);
    if let Some(step) = &failure.failed_step {
      println!("  Failed step: {step}");
    }
    println!("  Rolled back: {} resource(s)", failure.rolled_back.len());
    for item in &failure.manual_cleanup {
      println!("  Manual cleanup required: {item}");
    }
  }
  if !report.succeeded() {
    process::exit(1);
  }
}
