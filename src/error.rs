//! Error taxonomy for provisioning runs.
//!
//! - [InvalidSpecificationError]: rejected before any step starts, nothing to clean up.
//! - [StepError]: a step's own failure; the first one aborts the run and triggers rollback.
//! - [DeferredValueConflictError]: a deferred key resolved twice. Always fatal, never retried.
//! - [CompensationError]: one rollback action failed; reported for manual cleanup.
//! - [ProvisionError]: the verdict carried by the terminal event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelReason;
use crate::types::ResourceLedgerEntry;

/// The request is missing required fields or breaks a cross-field rule.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("invalid provisioning spec: {}", problems.join("; "))]
pub struct InvalidSpecificationError {
  pub problems: Vec<String>,
}

/// A deferred key was resolved a second time.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("deferred value `{key}` resolved by `{resolved_by}`, again by `{attempted_by}`")]
pub struct DeferredValueConflictError {
  pub key: String,
  pub resolved_by: String,
  pub attempted_by: String,
}

/// Name used by registry callers for the single-assignment violation.
pub type AlreadyResolvedError = DeferredValueConflictError;

/// Failures of deferred value operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeferredError {
  #[error(transparent)]
  AlreadyResolved(#[from] DeferredValueConflictError),
  /// The run failed or was cancelled before the key was resolved.
  #[error("deferred value `{key}` abandoned: run is winding down")]
  Abandoned { key: String },
  #[error("registry snapshot could not be persisted: {0}")]
  Persist(String),
}

/// The ledger could not durably record a created resource. Fatal for the run.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("ledger entry for {resource} could not be persisted: {message}")]
pub struct LedgerError {
  pub resource: String,
  pub message: String,
}

/// Failure reported by an external service client.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientError {
  /// Worth retrying (timeouts, throttling, 5xx).
  #[error("transient: {0}")]
  Transient(String),
  #[error("{0}")]
  Permanent(String),
  /// The resource does not exist (e.g. already deleted).
  #[error("not found: {0}")]
  NotFound(String),
}

impl ClientError {
  pub fn is_transient(&self) -> bool {
    matches!(self, ClientError::Transient(_))
  }
}

/// Failure of one step's `run` (or of its compensation).
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepError {
  #[error("{0}")]
  External(String),
  #[error(transparent)]
  Client(#[from] ClientError),
  #[error(transparent)]
  Conflict(#[from] DeferredValueConflictError),
  #[error(transparent)]
  Ledger(#[from] LedgerError),
  #[error("registry snapshot could not be persisted: {0}")]
  Registry(String),
  #[error("deferred value `{key}` abandoned before resolution")]
  Abandoned { key: String },
  #[error("{failed} of {total} sub-tasks failed: {}", errors.join("; "))]
  SubTasks {
    failed: usize,
    total: usize,
    errors: Vec<String>,
  },
  #[error("cancelled")]
  Cancelled,
  #[error("no compensation registered")]
  NotCompensable,
}

impl StepError {
  /// True when the error only reflects the run winding down, not a failure of its own.
  pub fn is_interruption(&self) -> bool {
    matches!(self, StepError::Cancelled | StepError::Abandoned { .. })
  }
}

impl From<DeferredError> for StepError {
  fn from(e: DeferredError) -> Self {
    match e {
      DeferredError::AlreadyResolved(c) => StepError::Conflict(c),
      DeferredError::Abandoned { key } => StepError::Abandoned { key },
      DeferredError::Persist(m) => StepError::Registry(m),
    }
  }
}

/// A rollback action failed. The entry needs manual operator cleanup.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("compensating {entry} failed: {message}")]
pub struct CompensationError {
  pub entry: ResourceLedgerEntry,
  pub message: String,
}

/// Step graph rejected at construction time.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphError {
  #[error("step `{0}` is declared more than once")]
  DuplicateStep(String),
  #[error("step `{step}` depends on unknown step `{dependency}`")]
  UnknownDependency { step: String, dependency: String },
  #[error("dependency cycle through steps {0:?}")]
  Cycle(Vec<String>),
  #[error("step `{step}` awaits `{key}` but no step resolves it")]
  UnresolvedKey { step: String, key: String },
  #[error("deferred value `{key}` is resolved by more than one step: {steps:?}")]
  DuplicateResolver { key: String, steps: Vec<String> },
  #[error("optional step `{step}` resolves awaited value `{key}`; a skip would strand its waiters")]
  OptionalResolver { step: String, key: String },
  #[error("step `{awaiting}` awaits `{key}` but its resolver `{resolver}` runs after it")]
  DeferredDeadlock {
    key: String,
    awaiting: String,
    resolver: String,
  },
}

/// Verdict of a run that did not succeed, or a request rejected up front.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisionError {
  #[error(transparent)]
  InvalidSpecification(#[from] InvalidSpecificationError),
  #[error(transparent)]
  InvalidGraph(#[from] GraphError),
  #[error("step `{step_id}` failed: {error}")]
  StepExecution { step_id: String, error: StepError },
  #[error(transparent)]
  DeferredValueConflict(#[from] DeferredValueConflictError),
  #[error("run cancelled ({reason})")]
  Cancelled { reason: CancelReason },
  /// Run state could not be made durable, so created resources might become untraceable.
  #[error("run state could not be persisted: {0}")]
  StatePersistence(String),
}

impl ProvisionError {
  /// Maps the first failing step's error to the run verdict.
  pub fn from_step(step_id: &str, error: StepError) -> Self {
    match error {
      StepError::Conflict(c) => ProvisionError::DeferredValueConflict(c),
      other => ProvisionError::StepExecution {
        step_id: step_id.to_string(),
        error: other,
      },
    }
  }
}
