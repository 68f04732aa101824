//! Pipeline Executor: runs a [StepGraph] to a single terminal verdict.
//!
//! One coordinating task per run dispatches every step whose dependencies are `Succeeded` or
//! `Skipped` onto the runtime's workers. The first step failure moves the run to `Aborting`,
//! a cancel request (or watchdog expiry) to `Cancelling`; either way dispatch stops, started
//! steps are allowed to finish, and every ledger entry is then compensated newest-first. A
//! failed compensation becomes a manual-cleanup item and never stops the remaining ones.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::{CancelFlag, CancelReason};
use crate::deferred::DeferredValueRegistry;
use crate::error::{CompensationError, GraphError, ProvisionError, StepError};
use crate::events::EventSink;
use crate::ledger::ResourceLedger;
use crate::progress::Progress;
use crate::run_state_io::RunStateStore;
use crate::step::{StepAction, StepContext, StepGraph};
use crate::types::{
  ExecutorState, ResourceLedgerEntry, RunFailure, RunStatus, StepStatus, TerminalEvent,
};

/// Executor settings.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
  /// Wall-clock limit for the whole run. Expiry behaves exactly like a cancel request.
  pub watchdog: Option<Duration>,
}

/// Run-specific execution record of one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
  pub status: StepStatus,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
  pub error: Option<StepError>,
}

impl StepRecord {
  fn pending() -> Self {
    Self {
      status: StepStatus::Pending,
      started_at: None,
      finished_at: None,
      error: None,
    }
  }
}

/// One run: the step graph plus the run-scoped ledger, registry and cancel flag.
/// Mutated only by the executor.
pub struct PipelineRun {
  run_id: Uuid,
  graph: StepGraph,
  records: BTreeMap<String, StepRecord>,
  progress: Progress,
  state: ExecutorState,
  ledger: ResourceLedger,
  registry: DeferredValueRegistry,
  cancel: CancelFlag,
  store: Arc<dyn RunStateStore>,
  failure: Option<(Option<String>, ProvisionError)>,
}

impl std::fmt::Debug for PipelineRun {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PipelineRun")
      .field("run_id", &self.run_id)
      .field("state", &self.state)
      .field("records", &self.records)
      .finish_non_exhaustive()
  }
}

impl PipelineRun {
  pub fn new(run_id: Uuid, graph: StepGraph, store: Arc<dyn RunStateStore>) -> Self {
    let records = graph
      .steps()
      .iter()
      .map(|s| (s.id().to_string(), StepRecord::pending()))
      .collect();
    let progress = Progress::new(graph.steps().iter().map(|s| (s.id(), s.weight())));
    Self {
      run_id,
      records,
      progress,
      state: ExecutorState::NotStarted,
      ledger: ResourceLedger::new(run_id, Arc::clone(&store)),
      registry: DeferredValueRegistry::new(run_id, Arc::clone(&store)),
      cancel: CancelFlag::new(),
      graph,
      store,
      failure: None,
    }
  }

  /// Uses an externally owned cancel flag, so the caller can cancel while the run executes.
  pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn run_id(&self) -> Uuid {
    self.run_id
  }

  pub fn state(&self) -> ExecutorState {
    self.state
  }

  /// Shared `cancelRequested` flag for this run.
  pub fn cancel_flag(&self) -> CancelFlag {
    self.cancel.clone()
  }

  pub fn ledger(&self) -> &ResourceLedger {
    &self.ledger
  }

  pub fn registry(&self) -> &DeferredValueRegistry {
    &self.registry
  }

  fn status_of(&self, step_id: &str) -> StepStatus {
    self
      .records
      .get(step_id)
      .map(|r| r.status)
      .unwrap_or(StepStatus::Pending)
  }

  /// True while some step has not yet reached a terminal status.
  fn has_unfinished_steps(&self) -> bool {
    self
      .records
      .values()
      .any(|r| matches!(r.status, StepStatus::Pending | StepStatus::Running))
  }

  fn set_status(&mut self, step_id: &str, status: StepStatus, error: Option<StepError>) {
    if let Some(record) = self.records.get_mut(step_id) {
      if !record.status.can_transition_to(status) {
        warn!(step_id, from = %record.status, to = %status, "ignored illegal step transition");
        return;
      }
      record.status = status;
      if status == StepStatus::Running {
        record.started_at = Some(Utc::now());
      } else {
        record.finished_at = Some(Utc::now());
        record.error = error;
      }
    }
  }
}

/// Final result of a run, also returned to the caller of the run handle.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub run_id: Uuid,
  pub status: RunStatus,
  pub progress: u8,
  pub steps: BTreeMap<String, StepRecord>,
  /// Ledger as it stood when the run ended, oldest first (including rolled-back entries).
  pub ledger: Vec<ResourceLedgerEntry>,
  pub resolved: BTreeMap<String, String>,
  pub error: Option<RunFailure>,
}

impl RunReport {
  pub fn succeeded(&self) -> bool {
    self.status == RunStatus::Succeeded
  }

  pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
    self.steps.get(step_id).map(|r| r.status)
  }
}

enum StepOutcome {
  Succeeded,
  Skipped,
  Failed(StepError),
}

async fn run_step(action: Arc<dyn StepAction>, optional: bool, ctx: StepContext) -> StepOutcome {
  if let Err(e) = ctx.checkpoint() {
    return StepOutcome::Failed(e);
  }
  if optional && !action.precondition(&ctx).await {
    return StepOutcome::Skipped;
  }
  match action.run(&ctx).await {
    Ok(()) => StepOutcome::Succeeded,
    Err(e) => StepOutcome::Failed(e),
  }
}

/// Drives runs to completion.
#[derive(Debug, Clone, Default)]
pub struct PipelineExecutor {
  options: ExecutorOptions,
}

impl PipelineExecutor {
  pub fn new(options: ExecutorOptions) -> Self {
    Self { options }
  }

  /// Runs `run` to its terminal status, emitting progress and exactly one terminal event.
  #[instrument(level = "trace", skip_all, fields(run_id = %run.run_id))]
  pub async fn execute(&self, mut run: PipelineRun, events: EventSink) -> RunReport {
    run.state = ExecutorState::Running;
    info!(run_id = %run.run_id, steps = run.graph.len(), "run started");
    events.progress(None, format!("run started with {} steps", run.graph.len()));

    for key in run.graph.deferred_keys() {
      if let Err(e) = run.registry.declare(&key) {
        self.abort(&mut run, None, ProvisionError::StatePersistence(e.to_string()), &events);
        break;
      }
    }

    let mut in_flight: JoinSet<(String, StepOutcome)> = JoinSet::new();
    let deadline = self.options.watchdog.map(|d| Instant::now() + d);
    let watchdog = async move {
      match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
      }
    };
    tokio::pin!(watchdog);

    loop {
      // A cancel that lands after the last step finished leaves nothing to stop.
      if run.state.is_dispatching() && run.has_unfinished_steps() {
        if let Some(reason) = run.cancel.reason() {
          self.begin_cancel(&mut run, reason, &events);
        }
      }
      if run.state.is_dispatching() {
        self.dispatch_ready(&mut run, &mut in_flight, &events);
      }
      if in_flight.is_empty() {
        break;
      }
      let cancel = run.cancel.clone();
      let dispatching = run.state.is_dispatching();
      tokio::select! {
        biased;
        joined = in_flight.join_next() => match joined {
          Some(Ok((step_id, outcome))) => self.finish_step(&mut run, &step_id, outcome, &events),
          Some(Err(e)) => {
            error!(run_id = %run.run_id, error = %e, "step task lost");
            if run.state.is_dispatching() {
              let error = ProvisionError::StepExecution {
                step_id: "<unknown>".to_string(),
                error: StepError::External(e.to_string()),
              };
              self.abort(&mut run, None, error, &events);
            }
          }
          None => {}
        },
        reason = cancel.cancelled(), if dispatching => {
          self.begin_cancel(&mut run, reason, &events);
        }
        _ = &mut watchdog, if dispatching => {
          warn!(run_id = %run.run_id, "run watchdog expired");
          run.cancel.request(CancelReason::Watchdog);
          self.begin_cancel(&mut run, CancelReason::Watchdog, &events);
        }
      }
    }

    let never_started: Vec<String> = run
      .records
      .iter()
      .filter(|(_, r)| r.status == StepStatus::Pending)
      .map(|(id, _)| id.clone())
      .collect();
    if run.state.is_dispatching() && !never_started.is_empty() {
      // A validated graph always drains; anything left here could never be scheduled.
      self.abort(
        &mut run,
        None,
        GraphError::Cycle(never_started.clone()).into(),
        &events,
      );
    }
    for step_id in &never_started {
      run.set_status(step_id, StepStatus::Cancelled, None);
    }

    let status = run.state.terminal().unwrap_or(RunStatus::Failed);
    let error = if status == RunStatus::Succeeded {
      None
    } else {
      let (rolled_back, manual_cleanup) = self.rollback(&run, &events).await;
      let (failed_step, error) = run.failure.clone().unwrap_or((
        None,
        ProvisionError::Cancelled {
          reason: CancelReason::Requested,
        },
      ));
      Some(RunFailure {
        failed_step,
        error,
        manual_cleanup,
        rolled_back,
      })
    };
    run.state = match status {
      RunStatus::Succeeded => ExecutorState::Succeeded,
      RunStatus::Cancelled => ExecutorState::Cancelled,
      _ => ExecutorState::Failed,
    };

    if let Err(e) = run.store.clear(run.run_id) {
      warn!(run_id = %run.run_id, error = %e, "persisted run state could not be cleared");
    }
    info!(
      run_id = %run.run_id,
      status = %status,
      progress = run.progress.percentage(),
      "run finished"
    );
    events.terminal(TerminalEvent {
      status,
      error: error.clone(),
    });

    RunReport {
      run_id: run.run_id,
      status,
      progress: run.progress.percentage(),
      steps: run.records.clone(),
      ledger: run.ledger.entries_in_creation_order(),
      resolved: run.registry.resolved_values(),
      error,
    }
  }

  fn dispatch_ready(
    &self,
    run: &mut PipelineRun,
    in_flight: &mut JoinSet<(String, StepOutcome)>,
    events: &EventSink,
  ) {
    let ready: Vec<usize> = run
      .graph
      .steps()
      .iter()
      .enumerate()
      .filter(|(_, s)| run.status_of(s.id()) == StepStatus::Pending)
      .filter(|(_, s)| {
        s.depends_on()
          .iter()
          .all(|d| run.status_of(d).satisfies_dependents())
      })
      .map(|(i, _)| i)
      .collect();

    for i in ready {
      let step = &run.graph.steps()[i];
      let step_id = step.id().to_string();
      let action = step.action();
      let optional = step.is_optional();
      let ctx = StepContext::new(
        step_id.clone(),
        run.ledger.clone(),
        run.registry.clone(),
        run.cancel.clone(),
        events.clone(),
      );
      run.set_status(&step_id, StepStatus::Running, None);
      info!(run_id = %run.run_id, step_id = %step_id, "step started");
      events.progress(Some(&step_id), format!("{step_id} started"));
      in_flight.spawn(async move {
        let outcome = AssertUnwindSafe(run_step(action, optional, ctx))
          .catch_unwind()
          .await
          .unwrap_or_else(|_| {
            StepOutcome::Failed(StepError::External("step panicked".to_string()))
          });
        (step_id, outcome)
      });
    }
  }

  fn finish_step(
    &self,
    run: &mut PipelineRun,
    step_id: &str,
    outcome: StepOutcome,
    events: &EventSink,
  ) {
    let outcome = match outcome {
      StepOutcome::Succeeded => match run.graph.get(step_id).and_then(|s| {
        s.resolves()
          .iter()
          .find(|k| run.registry.get(k).is_none())
          .cloned()
      }) {
        Some(key) => StepOutcome::Failed(StepError::External(format!(
          "finished without resolving deferred value `{key}`"
        ))),
        None => StepOutcome::Succeeded,
      },
      other => other,
    };

    match outcome {
      StepOutcome::Succeeded | StepOutcome::Skipped => {
        let (status, verb) = match outcome {
          StepOutcome::Skipped => (StepStatus::Skipped, "skipped"),
          _ => (StepStatus::Succeeded, "succeeded"),
        };
        run.set_status(step_id, status, None);
        let pct = run.progress.complete(step_id);
        events.advance(pct);
        info!(run_id = %run.run_id, step_id, status = %status, progress = pct, "step finished");
        events.progress(Some(step_id), format!("{step_id} {verb}"));
      }
      StepOutcome::Failed(e) if e.is_interruption() && run.cancel.is_requested() => {
        if run.state.is_dispatching() {
          let reason = run.cancel.reason().unwrap_or(CancelReason::Requested);
          self.begin_cancel(run, reason, events);
        }
        run.set_status(step_id, StepStatus::Cancelled, Some(e));
        info!(run_id = %run.run_id, step_id, "step cancelled");
        events.progress(Some(step_id), format!("{step_id} cancelled"));
      }
      StepOutcome::Failed(e) if e.is_interruption() && run.state.is_winding_down() => {
        run.set_status(step_id, StepStatus::Cancelled, Some(e));
        info!(run_id = %run.run_id, step_id, "step interrupted by abort");
        events.progress(Some(step_id), format!("{step_id} interrupted"));
      }
      StepOutcome::Failed(e) => {
        warn!(run_id = %run.run_id, step_id, error = %e, "step failed");
        events.progress(Some(step_id), format!("{step_id} failed: {e}"));
        run.set_status(step_id, StepStatus::Failed, Some(e.clone()));
        if run.state.is_dispatching() {
          let verdict = ProvisionError::from_step(step_id, e);
          self.abort(run, Some(step_id.to_string()), verdict, events);
        }
      }
    }
  }

  fn abort(
    &self,
    run: &mut PipelineRun,
    failed_step: Option<String>,
    error: ProvisionError,
    events: &EventSink,
  ) {
    if !run.state.is_dispatching() {
      return;
    }
    warn!(run_id = %run.run_id, error = %error, "aborting run");
    run.state = ExecutorState::Aborting;
    events.progress(failed_step.as_deref(), format!("aborting: {error}"));
    run.failure = Some((failed_step, error));
    run.registry.abandon();
  }

  fn begin_cancel(&self, run: &mut PipelineRun, reason: CancelReason, events: &EventSink) {
    if !run.state.is_dispatching() {
      return;
    }
    info!(run_id = %run.run_id, reason = %reason, "cancelling run");
    run.state = ExecutorState::Cancelling;
    events.progress(None, format!("cancelling: {reason}"));
    run.failure = Some((None, ProvisionError::Cancelled { reason }));
    run.registry.abandon();
  }

  /// Compensates every ledger entry newest-first. Returns (compensated, manual cleanup).
  async fn rollback(
    &self,
    run: &PipelineRun,
    events: &EventSink,
  ) -> (Vec<ResourceLedgerEntry>, Vec<CompensationError>) {
    let mut rolled_back = Vec::new();
    let mut manual_cleanup = Vec::new();
    for entry in run.ledger.reverse_for_rollback() {
      events.progress(
        Some(&entry.created_by_step),
        format!("rolling back {} `{}`", entry.resource_type, entry.identifier),
      );
      let result = match run.graph.get(&entry.created_by_step) {
        Some(step) => {
          let action = step.action();
          AssertUnwindSafe(action.compensate(&entry))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(StepError::External("compensation panicked".to_string())))
        }
        None => Err(StepError::NotCompensable),
      };
      match result {
        Ok(()) => {
          info!(
            run_id = %run.run_id,
            resource_type = %entry.resource_type,
            identifier = %entry.identifier,
            "resource compensated"
          );
          rolled_back.push(entry);
        }
        Err(e) => {
          error!(
            run_id = %run.run_id,
            resource_type = %entry.resource_type,
            identifier = %entry.identifier,
            step_id = %entry.created_by_step,
            error = %e,
            "compensation failed; manual cleanup required"
          );
          manual_cleanup.push(CompensationError {
            entry,
            message: e.to_string(),
          });
        }
      }
    }
    (rolled_back, manual_cleanup)
  }
}
