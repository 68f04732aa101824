//! Deferred Value Registry: values declared early in a run and resolved exactly once later.
//!
//! A step that needs a late value `declare`s it and calls [DeferredValueRegistry::await_value]
//! right where it materializes its output, so nothing is ever written with a placeholder and
//! rewritten afterwards. `resolve` is single-assignment; a second resolve of the same key is a
//! [DeferredValueConflictError]. When the run winds down, [DeferredValueRegistry::abandon]
//! wakes every waiter with [DeferredError::Abandoned].

use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{DeferredError, DeferredValueConflictError};
use crate::run_state_io::RunStateStore;
use crate::types::{DeferredEntry, DeferredState, RegistrySnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotState {
  Unresolved,
  Resolved(String),
  Abandoned,
}

struct Slot {
  entry: DeferredEntry,
  tx: watch::Sender<SlotState>,
}

#[derive(Default)]
struct RegistryInner {
  slots: BTreeMap<String, Slot>,
  abandoned: bool,
}

impl RegistryInner {
  fn slot(&mut self, key: &str) -> (&mut Slot, bool) {
    let abandoned = self.abandoned;
    let mut created = false;
    let slot = self.slots.entry(key.to_string()).or_insert_with(|| {
      created = true;
      let initial = if abandoned {
        SlotState::Abandoned
      } else {
        SlotState::Unresolved
      };
      let (tx, _rx) = watch::channel(initial);
      Slot {
        entry: DeferredEntry::unresolved(key),
        tx,
      }
    });
    (slot, created)
  }

  fn entries(&self) -> Vec<DeferredEntry> {
    self.slots.values().map(|s| s.entry.clone()).collect()
  }
}

/// Cloneable handle to one run's registry. All clones share the same keys.
#[derive(Clone)]
pub struct DeferredValueRegistry {
  run_id: Uuid,
  inner: Arc<Mutex<RegistryInner>>,
  store: Arc<dyn RunStateStore>,
}

impl fmt::Debug for DeferredValueRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DeferredValueRegistry")
      .field("run_id", &self.run_id)
      .field("entries", &self.entries())
      .finish()
  }
}

impl DeferredValueRegistry {
  pub fn new(run_id: Uuid, store: Arc<dyn RunStateStore>) -> Self {
    Self {
      run_id,
      inner: Arc::new(Mutex::new(RegistryInner::default())),
      store,
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
    self.inner.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn persist(&self, inner: &RegistryInner) -> Result<(), DeferredError> {
    let snapshot = RegistrySnapshot {
      run_id: self.run_id,
      updated_at: Utc::now(),
      entries: inner.entries(),
    };
    self
      .store
      .save_registry(&snapshot)
      .map_err(|e| DeferredError::Persist(e.to_string()))
  }

  /// Declares `key`. Idempotent: any number of dependents may declare the same key.
  #[instrument(level = "trace", skip(self))]
  pub fn declare(&self, key: &str) -> Result<(), DeferredError> {
    let mut inner = self.lock();
    let (_, created) = inner.slot(key);
    if created {
      debug!(run_id = %self.run_id, key, "deferred value declared");
      self.persist(&inner)?;
    }
    Ok(())
  }

  /// Assigns `value` to `key` and wakes every waiter. Fails on a second resolve.
  #[instrument(level = "trace", skip(self, value))]
  pub fn resolve(
    &self,
    key: &str,
    value: impl Into<String>,
    by_step: &str,
  ) -> Result<(), DeferredError> {
    let value = value.into();
    let mut inner = self.lock();
    let (slot, _) = inner.slot(key);
    if slot.entry.is_resolved() {
      return Err(
        DeferredValueConflictError {
          key: key.to_string(),
          resolved_by: slot.entry.resolved_by_step.clone().unwrap_or_default(),
          attempted_by: by_step.to_string(),
        }
        .into(),
      );
    }
    slot.entry.state = DeferredState::Resolved;
    slot.entry.value = Some(value.clone());
    slot.entry.resolved_by_step = Some(by_step.to_string());
    slot.tx.send_replace(SlotState::Resolved(value));
    info!(run_id = %self.run_id, key, step_id = by_step, "deferred value resolved");
    self.persist(&inner)
  }

  /// Suspends until `key` is resolved (returning its value) or the run winds down.
  #[instrument(level = "trace", skip(self))]
  pub async fn await_value(&self, key: &str) -> Result<String, DeferredError> {
    let mut rx = {
      let mut inner = self.lock();
      let (slot, created) = inner.slot(key);
      let rx = slot.tx.subscribe();
      if created {
        self.persist(&inner)?;
      }
      rx
    };
    let state = match rx.wait_for(|s| *s != SlotState::Unresolved).await {
      Ok(state) => state.clone(),
      Err(_) => SlotState::Abandoned,
    };
    match state {
      SlotState::Resolved(value) => Ok(value),
      _ => Err(DeferredError::Abandoned {
        key: key.to_string(),
      }),
    }
  }

  /// Current value of `key`, without waiting.
  pub fn get(&self, key: &str) -> Option<String> {
    self
      .lock()
      .slots
      .get(key)
      .and_then(|s| s.entry.value.clone())
  }

  /// Wakes all waiters on unresolved keys with [DeferredError::Abandoned]. Keys declared
  /// afterwards start abandoned. Resolved values are untouched.
  pub fn abandon(&self) {
    let mut inner = self.lock();
    inner.abandoned = true;
    for slot in inner.slots.values() {
      if !slot.entry.is_resolved() {
        slot.tx.send_replace(SlotState::Abandoned);
      }
    }
    debug!(run_id = %self.run_id, "deferred registry abandoned");
  }

  pub fn entries(&self) -> Vec<DeferredEntry> {
    self.lock().entries()
  }

  /// All resolved values by key.
  pub fn resolved_values(&self) -> BTreeMap<String, String> {
    self
      .lock()
      .slots
      .iter()
      .filter_map(|(k, s)| s.entry.value.clone().map(|v| (k.clone(), v)))
      .collect()
  }
}
