//! Durable per-run snapshots of the ledger and the deferred value registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DeferredEntry, ResourceLedgerEntry};

/// Ledger snapshot, rewritten after every append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
  pub run_id: Uuid,
  pub updated_at: DateTime<Utc>,
  /// Entries oldest-first.
  pub entries: Vec<ResourceLedgerEntry>,
}

/// Registry snapshot, rewritten after every declare or resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
  pub run_id: Uuid,
  pub updated_at: DateTime<Utc>,
  pub entries: Vec<DeferredEntry>,
}
