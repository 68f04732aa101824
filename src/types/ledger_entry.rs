//! One externally created resource, recorded so it can be deleted on rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of external resource a ledger entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
  Repository,
  HostedContentSite,
  EdgeConfigBinding,
  DeployedEndpoint,
  LocalDirectory,
  InstalledPackage,
}

impl fmt::Display for ResourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ResourceType::Repository => "repository",
      ResourceType::HostedContentSite => "hosted-content-site",
      ResourceType::EdgeConfigBinding => "edge-config-binding",
      ResourceType::DeployedEndpoint => "deployed-endpoint",
      ResourceType::LocalDirectory => "local-directory",
      ResourceType::InstalledPackage => "installed-package",
    };
    f.write_str(s)
  }
}

/// A resource whose creation has been confirmed by the external service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLedgerEntry {
  pub resource_type: ResourceType,
  /// Opaque identifier, sufficient for the owning service to locate and delete the resource.
  pub identifier: String,
  pub created_by_step: String,
  pub created_at: DateTime<Utc>,
}

impl ResourceLedgerEntry {
  pub fn new(
    resource_type: ResourceType,
    identifier: impl Into<String>,
    created_by_step: impl Into<String>,
  ) -> Self {
    Self {
      resource_type,
      identifier: identifier.into(),
      created_by_step: created_by_step.into(),
      created_at: Utc::now(),
    }
  }
}

impl fmt::Display for ResourceLedgerEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} `{}` (created by {})",
      self.resource_type, self.identifier, self.created_by_step
    )
  }
}
