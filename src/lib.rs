//! # demo-provisioner
//!
//! Rollback-safe provisioning of multi-service demo projects.
//!
//! ## Architecture
//!
//! A request ([ProvisionSpec]) is turned into a validated [StepGraph] by the [steps] module.
//! The [PipelineExecutor] runs the graph with dependency-ordered concurrency:
//!
//! - every confirmed external resource is appended to the run's [ResourceLedger]
//! - values only known late (repository URL, endpoint URL) go through the
//!   [DeferredValueRegistry], so the configuration artifact is written once with final values
//! - on failure or cancellation the ledger is compensated newest-first
//!
//! [Provisioner] is the entry point; it relays progress and exactly one terminal event per run.
//! Ledger and registry are persisted per run ([run_state_io]) and an [OrphanSweeper] replays
//! ledgers left behind by a crash.

pub mod cancel;
pub mod clients;
pub mod config;
pub mod deferred;
#[cfg(test)]
mod deferred_test;
pub mod error;
#[cfg(test)]
mod error_test;
pub mod events;
pub mod executor;
pub mod ledger;
pub mod orchestrator;
#[cfg(test)]
mod orchestrator_test;
pub mod progress;
#[cfg(test)]
mod progress_test;
pub mod retry;
#[cfg(test)]
mod retry_test;
pub mod run_state_io;
pub mod step;
pub mod steps;
pub mod sweep;
#[cfg(test)]
mod sweep_test;
pub mod types;

pub use cancel::{CancelFlag, CancelReason};
pub use clients::{ServiceClient, ServiceKind, Services, SimulatedEnvironment};
pub use config::{PrerequisitePlacement, ProvisionerConfig, load_config};
pub use deferred::DeferredValueRegistry;
pub use error::{ProvisionError, StepError};
pub use executor::{ExecutorOptions, PipelineExecutor, PipelineRun, RunReport};
pub use ledger::ResourceLedger;
pub use orchestrator::{Provisioner, RunHandle};
pub use step::{Step, StepAction, StepContext, StepGraph};
pub use sweep::{OrphanSweeper, SweepReport};
pub use types::{ProvisionSpec, RunEvent, RunStatus};
