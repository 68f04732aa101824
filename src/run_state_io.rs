//! Durable per-run state: one ledger snapshot and one registry snapshot per in-flight run,
//! keyed by run id, rewritten after every mutation and cleared on terminal status.
//!
//! File layout under the state root: `<run-id>/ledger.json` and `<run-id>/registry.json`.

use crate::types::{LedgerSnapshot, RegistrySnapshot};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

/// Filename of the ledger snapshot under a run directory.
pub const LEDGER_FILENAME: &str = "ledger.json";
/// Filename of the registry snapshot under a run directory.
pub const REGISTRY_FILENAME: &str = "registry.json";

/// Storage for in-flight run state. Must be readable after a restart.
pub trait RunStateStore: Send + Sync {
  fn save_ledger(&self, snapshot: &LedgerSnapshot) -> io::Result<()>;
  fn save_registry(&self, snapshot: &RegistrySnapshot) -> io::Result<()>;
  fn load_ledger(&self, run_id: Uuid) -> io::Result<Option<LedgerSnapshot>>;
  fn load_registry(&self, run_id: Uuid) -> io::Result<Option<RegistrySnapshot>>;
  /// Removes all state for the run. Clearing an unknown run is not an error.
  fn clear(&self, run_id: Uuid) -> io::Result<()>;
  /// Runs that still have persisted state (crashed or not yet terminal).
  fn outstanding_runs(&self) -> io::Result<Vec<Uuid>>;
}

/// Writes `value` as pretty JSON to `path` via a temp file, fsync and rename, so a crash
/// leaves either the previous snapshot or the new one, never a torn file.
#[instrument(level = "trace", skip(path, value))]
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
  let json = serde_json::to_vec_pretty(value)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let tmp = path.with_extension("json.tmp");
  {
    let mut file = File::create(&tmp)?;
    file.write_all(&json)?;
    file.sync_all()?;
  }
  fs::rename(&tmp, path)
}

/// Reads JSON from `path`. `Ok(None)` when the file does not exist.
#[instrument(level = "trace", skip(path))]
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
  let bytes = match fs::read(path) {
    Ok(b) => b,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(e),
  };
  serde_json::from_slice(&bytes)
    .map(Some)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// File-backed store rooted at a state directory.
#[derive(Debug, Clone)]
pub struct FileRunStateStore {
  root: PathBuf,
}

impl FileRunStateStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
    self.root.join(run_id.to_string())
  }
}

impl RunStateStore for FileRunStateStore {
  fn save_ledger(&self, snapshot: &LedgerSnapshot) -> io::Result<()> {
    write_json_atomic(&self.run_dir(snapshot.run_id).join(LEDGER_FILENAME), snapshot)
  }

  fn save_registry(&self, snapshot: &RegistrySnapshot) -> io::Result<()> {
    write_json_atomic(
      &self.run_dir(snapshot.run_id).join(REGISTRY_FILENAME),
      snapshot,
    )
  }

  fn load_ledger(&self, run_id: Uuid) -> io::Result<Option<LedgerSnapshot>> {
    read_json(&self.run_dir(run_id).join(LEDGER_FILENAME))
  }

  fn load_registry(&self, run_id: Uuid) -> io::Result<Option<RegistrySnapshot>> {
    read_json(&self.run_dir(run_id).join(REGISTRY_FILENAME))
  }

  fn clear(&self, run_id: Uuid) -> io::Result<()> {
    match fs::remove_dir_all(self.run_dir(run_id)) {
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      other => other,
    }
  }

  fn outstanding_runs(&self) -> io::Result<Vec<Uuid>> {
    let entries = match fs::read_dir(&self.root) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
      Err(e) => return Err(e),
    };
    let mut runs = Vec::new();
    for entry in entries {
      let entry = entry?;
      if !entry.file_type()?.is_dir() {
        continue;
      }
      if let Some(id) = entry
        .file_name()
        .to_str()
        .and_then(|name| Uuid::parse_str(name).ok())
      {
        runs.push(id);
      }
    }
    runs.sort();
    Ok(runs)
  }
}

/// In-process store; state does not survive a restart. Used when no state directory is set.
#[derive(Debug, Default)]
pub struct MemoryRunStateStore {
  runs: Mutex<HashMap<Uuid, MemoryRunState>>,
}

#[derive(Debug, Default, Clone)]
struct MemoryRunState {
  ledger: Option<LedgerSnapshot>,
  registry: Option<RegistrySnapshot>,
}

impl MemoryRunStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_runs<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, MemoryRunState>) -> R) -> R {
    let mut runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
    f(&mut runs)
  }
}

impl RunStateStore for MemoryRunStateStore {
  fn save_ledger(&self, snapshot: &LedgerSnapshot) -> io::Result<()> {
    self.with_runs(|runs| {
      runs.entry(snapshot.run_id).or_default().ledger = Some(snapshot.clone());
    });
    Ok(())
  }

  fn save_registry(&self, snapshot: &RegistrySnapshot) -> io::Result<()> {
    self.with_runs(|runs| {
      runs.entry(snapshot.run_id).or_default().registry = Some(snapshot.clone());
    });
    Ok(())
  }

  fn load_ledger(&self, run_id: Uuid) -> io::Result<Option<LedgerSnapshot>> {
    Ok(self.with_runs(|runs| runs.get(&run_id).and_then(|r| r.ledger.clone())))
  }

  fn load_registry(&self, run_id: Uuid) -> io::Result<Option<RegistrySnapshot>> {
    Ok(self.with_runs(|runs| runs.get(&run_id).and_then(|r| r.registry.clone())))
  }

  fn clear(&self, run_id: Uuid) -> io::Result<()> {
    self.with_runs(|runs| runs.remove(&run_id));
    Ok(())
  }

  fn outstanding_runs(&self) -> io::Result<Vec<Uuid>> {
    let mut ids: Vec<Uuid> = self.with_runs(|runs| runs.keys().copied().collect());
    ids.sort();
    Ok(ids)
  }
}
