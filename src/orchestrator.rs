//! Provisioning Orchestrator: the public entry point.
//!
//! [Provisioner::provision] validates the request, builds the step graph for it and starts
//! the executor on its own task. The returned [RunHandle] carries the event stream, the
//! cancel switch and the final [RunReport].

use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cancel::{CancelFlag, CancelReason};
use crate::clients::Services;
use crate::config::ProvisionerConfig;
use crate::error::ProvisionError;
use crate::events::EventSink;
use crate::executor::{ExecutorOptions, PipelineExecutor, PipelineRun, RunReport};
use crate::run_state_io::{FileRunStateStore, MemoryRunStateStore, RunStateStore};
use crate::steps::build_step_graph;
use crate::types::{ProvisionSpec, RunEvent};

/// Handle to one started run.
#[derive(Debug)]
pub struct RunHandle {
  run_id: Uuid,
  cancel: CancelFlag,
  events: Option<tokio::sync::mpsc::UnboundedReceiver<RunEvent>>,
  task: JoinHandle<RunReport>,
}

impl RunHandle {
  pub fn run_id(&self) -> Uuid {
    self.run_id
  }

  /// Requests cooperative cancellation and returns immediately.
  pub fn cancel(&self) -> bool {
    self.cancel.request(CancelReason::Requested)
  }

  /// Shared cancel flag of the run, for collaborators that need to observe or trigger it.
  pub fn cancel_flag(&self) -> CancelFlag {
    self.cancel.clone()
  }

  /// The run's event stream: progress events, then exactly one terminal event.
  /// Can be taken once; later calls return `None`.
  pub fn events(&mut self) -> Option<UnboundedReceiverStream<RunEvent>> {
    self.events.take().map(UnboundedReceiverStream::new)
  }

  /// Waits for the run to reach its terminal status.
  pub async fn wait(self) -> Result<RunReport, JoinError> {
    self.task.await
  }
}

/// Starts provisioning runs against one set of services.
#[derive(Clone)]
pub struct Provisioner {
  services: Services,
  config: ProvisionerConfig,
  store: Arc<dyn RunStateStore>,
}

impl std::fmt::Debug for Provisioner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Provisioner")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

impl Provisioner {
  /// Persists run state under `config.state_dir`, or in memory when it is unset.
  pub fn new(services: Services, config: ProvisionerConfig) -> Self {
    let store: Arc<dyn RunStateStore> = match &config.state_dir {
      Some(dir) => Arc::new(FileRunStateStore::new(dir.clone())),
      None => Arc::new(MemoryRunStateStore::new()),
    };
    Self::with_store(services, config, store)
  }

  pub fn with_store(
    services: Services,
    config: ProvisionerConfig,
    store: Arc<dyn RunStateStore>,
  ) -> Self {
    Self {
      services,
      config,
      store,
    }
  }

  pub fn config(&self) -> &ProvisionerConfig {
    &self.config
  }

  pub fn store(&self) -> Arc<dyn RunStateStore> {
    Arc::clone(&self.store)
  }

  pub fn services(&self) -> &Services {
    &self.services
  }

  /// Validates `spec` and starts a run. Fails before any step starts on an invalid request
  /// or an unbuildable graph. Must be called from within a Tokio runtime.
  #[instrument(level = "trace", skip_all, fields(project = %spec.project_name))]
  pub fn provision(&self, spec: &ProvisionSpec) -> Result<RunHandle, ProvisionError> {
    spec.validate()?;
    let graph = build_step_graph(spec, &self.services, &self.config)?;

    let run_id = Uuid::new_v4();
    let cancel = CancelFlag::new();
    let run =
      PipelineRun::new(run_id, graph, Arc::clone(&self.store)).with_cancel_flag(cancel.clone());
    let (sink, events) = EventSink::channel();
    let executor = PipelineExecutor::new(ExecutorOptions {
      watchdog: self.config.watchdog(),
    });
    info!(run_id = %run_id, project = %spec.project_name, "provisioning started");
    let task = tokio::spawn(async move { executor.execute(run, sink).await });

    Ok(RunHandle {
      run_id,
      cancel,
      events: Some(events),
      task,
    })
  }

  /// Requests cancellation of `handle`'s run and returns immediately.
  pub fn cancel(&self, handle: &RunHandle) -> bool {
    info!(run_id = %handle.run_id, "cancel requested");
    handle.cancel()
  }
}
