//! Orphan sweep: compensates resources left behind by runs that never reached a terminal
//! status (process crash, power loss). Replays each outstanding persisted ledger newest-first.

use serde::Serialize;
use std::io;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::clients::Services;
use crate::error::CompensationError;
use crate::retry::RetryPolicy;
use crate::run_state_io::RunStateStore;
use crate::steps::delete_resource;
use crate::types::{LedgerSnapshot, ResourceLedgerEntry};

/// What one sweep did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
  /// Runs whose persisted state was fully cleared.
  pub cleared_runs: Vec<Uuid>,
  pub compensated: Vec<ResourceLedgerEntry>,
  /// Entries that still exist; their ledgers are kept for the next sweep.
  pub manual_cleanup: Vec<CompensationError>,
}

/// Replays outstanding ledgers through the owning services.
pub struct OrphanSweeper {
  services: Services,
  store: Arc<dyn RunStateStore>,
  retry: RetryPolicy,
}

impl OrphanSweeper {
  pub fn new(services: Services, store: Arc<dyn RunStateStore>, retry: RetryPolicy) -> Self {
    Self {
      services,
      store,
      retry,
    }
  }

  /// Sweeps every outstanding run. Only store I/O errors abort the sweep.
  #[instrument(level = "trace", skip(self))]
  pub async fn sweep(&self) -> io::Result<SweepReport> {
    let mut report = SweepReport::default();
    for run_id in self.store.outstanding_runs()? {
      let Some(snapshot) = self.store.load_ledger(run_id)? else {
        self.store.clear(run_id)?;
        report.cleared_runs.push(run_id);
        continue;
      };

      let mut remaining = Vec::new();
      for entry in snapshot.entries.iter().rev() {
        let client = self.services.client_for(entry.resource_type);
        match delete_resource(client.as_ref(), self.retry, entry).await {
          Ok(()) => {
            info!(
              run_id = %run_id,
              resource_type = %entry.resource_type,
              identifier = %entry.identifier,
              "orphan compensated"
            );
            report.compensated.push(entry.clone());
          }
          Err(e) => {
            error!(
              run_id = %run_id,
              resource_type = %entry.resource_type,
              identifier = %entry.identifier,
              error = %e,
              "orphan compensation failed; manual cleanup required"
            );
            report.manual_cleanup.push(CompensationError {
              entry: entry.clone(),
              message: e.to_string(),
            });
            remaining.push(entry.clone());
          }
        }
      }

      if remaining.is_empty() {
        self.store.clear(run_id)?;
        report.cleared_runs.push(run_id);
      } else {
        remaining.reverse();
        self.store.save_ledger(&LedgerSnapshot {
          run_id,
          updated_at: chrono::Utc::now(),
          entries: remaining,
        })?;
      }
    }
    Ok(report)
  }
}
