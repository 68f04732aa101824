//! Plain data types shared by the ledger, registry, executor and front end.

mod deferred_entry;
mod ledger_entry;
mod provision_spec;
mod run_event;
mod run_snapshot;
mod run_status;
mod step_status;

pub use deferred_entry::{DeferredEntry, DeferredState};
pub use ledger_entry::{ResourceLedgerEntry, ResourceType};
pub use provision_spec::{Capability, ProvisionSpec};
pub use run_event::{ProgressEvent, RunEvent, RunFailure, TerminalEvent};
pub use run_snapshot::{LedgerSnapshot, RegistrySnapshot};
pub use run_status::{ExecutorState, RunStatus};
pub use step_status::StepStatus;
