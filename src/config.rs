//! Provisioner configuration: JSON file, then environment overrides.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

use crate::retry::RetryPolicy;

pub const ENV_STATE_DIR: &str = "PROVISION_STATE_DIR";
pub const ENV_WATCHDOG_SECS: &str = "PROVISION_WATCHDOG_SECS";
pub const ENV_MAX_RETRIES: &str = "PROVISION_MAX_RETRIES";
pub const ENV_PREREQUISITES: &str = "PROVISION_PREREQUISITES";

/// Where the prerequisite check sits in the step graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrerequisitePlacement {
  /// Every step waits for the prerequisite check.
  #[default]
  Upfront,
  /// Only package installation waits; remote provisioning starts immediately.
  Interleaved,
}

impl fmt::Display for PrerequisitePlacement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PrerequisitePlacement::Upfront => write!(f, "upfront"),
      PrerequisitePlacement::Interleaved => write!(f, "interleaved"),
    }
  }
}

impl FromStr for PrerequisitePlacement {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "upfront" => Ok(PrerequisitePlacement::Upfront),
      "interleaved" => Ok(PrerequisitePlacement::Interleaved),
      other => Err(format!(
        "unknown prerequisite placement `{other}` (expected upfront or interleaved)"
      )),
    }
  }
}

/// Runtime settings for [crate::Provisioner].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
  /// Root for persisted run state. `None` keeps run state in memory.
  pub state_dir: Option<PathBuf>,
  /// Wall-clock limit per run, in seconds. `None` disables the watchdog.
  pub watchdog_secs: Option<u64>,
  pub retry: RetryPolicy,
  pub prerequisites: PrerequisitePlacement,
  /// Upper bound on concurrent package installs.
  pub max_concurrent_installs: usize,
  /// File name of the configuration artifact written into the project directory.
  pub artifact_name: String,
}

impl Default for ProvisionerConfig {
  fn default() -> Self {
    Self {
      state_dir: None,
      watchdog_secs: None,
      retry: RetryPolicy::default(),
      prerequisites: PrerequisitePlacement::default(),
      max_concurrent_installs: 4,
      artifact_name: "project.config.json".to_string(),
    }
  }
}

impl ProvisionerConfig {
  pub fn watchdog(&self) -> Option<Duration> {
    self.watchdog_secs.map(Duration::from_secs)
  }

  /// Applies `PROVISION_*` variables from the process environment.
  pub fn with_env_overrides(self) -> Result<Self, std::io::Error> {
    self.with_overrides(|name| std::env::var(name).ok())
  }

  /// Applies overrides read through `lookup`. Unparseable values are an error.
  pub fn with_overrides(
    mut self,
    lookup: impl Fn(&str) -> Option<String>,
  ) -> Result<Self, std::io::Error> {
    if let Some(dir) = lookup(ENV_STATE_DIR).filter(|s| !s.is_empty()) {
      self.state_dir = Some(PathBuf::from(dir));
    }
    if let Some(secs) = lookup(ENV_WATCHDOG_SECS) {
      self.watchdog_secs = Some(parse(ENV_WATCHDOG_SECS, &secs)?);
    }
    if let Some(retries) = lookup(ENV_MAX_RETRIES) {
      self.retry.max_attempts = parse(ENV_MAX_RETRIES, &retries)?;
    }
    if let Some(placement) = lookup(ENV_PREREQUISITES) {
      self.prerequisites = placement.parse().map_err(invalid)?;
    }
    Ok(self)
  }
}

fn invalid(message: String) -> std::io::Error {
  std::io::Error::new(std::io::ErrorKind::InvalidInput, message)
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, std::io::Error>
where
  T::Err: fmt::Display,
{
  value
    .trim()
    .parse()
    .map_err(|e: T::Err| invalid(format!("{name}={value}: {e}")))
}

/// Loads a [ProvisionerConfig] from a JSON file. Missing fields take their defaults.
#[instrument(level = "trace", skip(path))]
pub fn load_config(path: &Path) -> Result<ProvisionerConfig, std::io::Error> {
  let bytes = std::fs::read(path)?;
  serde_json::from_slice(&bytes)
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
