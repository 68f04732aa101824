//! Resource Ledger: append-only, run-scoped record of every externally created resource.
//!
//! Entries are appended only after the external side effect is confirmed, and the snapshot is
//! persisted on every append. If persistence fails the entry is still kept in memory (the
//! resource exists either way) and the append reports [LedgerError], which aborts the run.

use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::run_state_io::RunStateStore;
use crate::types::{LedgerSnapshot, ResourceLedgerEntry, ResourceType};

/// Cloneable handle to one run's ledger. All clones share the same entries.
#[derive(Clone)]
pub struct ResourceLedger {
  run_id: Uuid,
  entries: Arc<Mutex<Vec<ResourceLedgerEntry>>>,
  store: Arc<dyn RunStateStore>,
}

impl fmt::Debug for ResourceLedger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResourceLedger")
      .field("run_id", &self.run_id)
      .field("entries", &self.len())
      .finish()
  }
}

impl ResourceLedger {
  pub fn new(run_id: Uuid, store: Arc<dyn RunStateStore>) -> Self {
    Self {
      run_id,
      entries: Arc::new(Mutex::new(Vec::new())),
      store,
    }
  }

  /// Rebuilds a ledger from a persisted snapshot (orphan sweep after restart).
  pub fn restore(snapshot: LedgerSnapshot, store: Arc<dyn RunStateStore>) -> Self {
    Self {
      run_id: snapshot.run_id,
      entries: Arc::new(Mutex::new(snapshot.entries)),
      store,
    }
  }

  pub fn run_id(&self) -> Uuid {
    self.run_id
  }

  /// Records a confirmed resource and persists the ledger.
  #[instrument(level = "trace", skip(self, entry), fields(run_id = %self.run_id))]
  pub fn append(&self, entry: ResourceLedgerEntry) -> Result<(), LedgerError> {
    let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    info!(
      run_id = %self.run_id,
      resource_type = %entry.resource_type,
      identifier = %entry.identifier,
      step_id = %entry.created_by_step,
      "ledger append"
    );
    let resource = entry.to_string();
    entries.push(entry);
    let snapshot = LedgerSnapshot {
      run_id: self.run_id,
      updated_at: Utc::now(),
      entries: entries.clone(),
    };
    self.store.save_ledger(&snapshot).map_err(|e| {
      error!(run_id = %self.run_id, error = %e, "ledger persistence failed");
      LedgerError {
        resource,
        message: e.to_string(),
      }
    })
  }

  /// Builds an entry stamped now and appends it.
  pub fn record(
    &self,
    resource_type: ResourceType,
    identifier: impl Into<String>,
    created_by_step: impl Into<String>,
  ) -> Result<ResourceLedgerEntry, LedgerError> {
    let entry = ResourceLedgerEntry::new(resource_type, identifier, created_by_step);
    self.append(entry.clone())?;
    Ok(entry)
  }

  /// Entries oldest-first (actual append order, which is completion order).
  pub fn entries_in_creation_order(&self) -> Vec<ResourceLedgerEntry> {
    self
      .entries
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .clone()
  }

  /// Entries newest-first: the order compensation must run in.
  pub fn reverse_for_rollback(&self) -> Vec<ResourceLedgerEntry> {
    let mut entries = self.entries_in_creation_order();
    entries.reverse();
    entries
  }

  pub fn len(&self) -> usize {
    self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
