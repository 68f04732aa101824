//! The provisioning request submitted by the front end.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

use crate::error::InvalidSpecificationError;

static PROJECT_NAME: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{1,62}$").expect("project name pattern"));

/// Optional service capabilities a project may request. Steps for a capability exist in the
/// run's graph only when the capability is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
  /// A content-authoring site backed by the project repository.
  HostedContent,
  /// Edge-delivery configuration bound to the hosted content site.
  EdgeDelivery,
  /// A managed API-composition (mesh) endpoint.
  ApiMesh,
}

impl fmt::Display for Capability {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Capability::HostedContent => write!(f, "hosted-content"),
      Capability::EdgeDelivery => write!(f, "edge-delivery"),
      Capability::ApiMesh => write!(f, "api-mesh"),
    }
  }
}

/// A request to provision one demo project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionSpec {
  /// Lowercase slug used for the repository, site and endpoint names.
  pub project_name: String,
  /// Organisation or user that owns the repository.
  pub owner: String,
  /// Template repository the project starts from.
  pub template: String,
  /// Local directory the project is materialized into.
  pub project_dir: PathBuf,
  #[serde(default)]
  pub capabilities: BTreeSet<Capability>,
  /// Tools the prerequisite checker must confirm before provisioning starts.
  #[serde(default)]
  pub required_tools: Vec<String>,
  /// Local packages installed into the project; already-present packages are not reinstalled.
  #[serde(default)]
  pub packages: Vec<String>,
  /// Backend sources composed by the API mesh.
  #[serde(default)]
  pub mesh_sources: Vec<String>,
}

impl ProvisionSpec {
  pub fn wants(&self, capability: Capability) -> bool {
    self.capabilities.contains(&capability)
  }

  /// Checks every required field and cross-field rule, reporting all problems at once.
  pub fn validate(&self) -> Result<(), InvalidSpecificationError> {
    let mut problems = Vec::new();
    if self.project_name.is_empty() {
      problems.push("project_name is required".to_string());
    } else if !PROJECT_NAME.is_match(&self.project_name) {
      problems.push(format!(
        "project_name `{}` must be 2-63 lowercase letters, digits or dashes",
        self.project_name
      ));
    }
    if self.owner.trim().is_empty() {
      problems.push("owner is required".to_string());
    }
    if self.template.trim().is_empty() {
      problems.push("template is required".to_string());
    }
    if self.project_dir.as_os_str().is_empty() {
      problems.push("project_dir is required".to_string());
    }
    if self.wants(Capability::EdgeDelivery) && !self.wants(Capability::HostedContent) {
      problems.push("edge-delivery requires the hosted-content capability".to_string());
    }
    if self.wants(Capability::ApiMesh) && self.mesh_sources.is_empty() {
      problems.push("api-mesh requires at least one mesh source".to_string());
    }
    let mut seen = HashSet::new();
    for package in &self.packages {
      if package.trim().is_empty() {
        problems.push("package names must not be empty".to_string());
      } else if !seen.insert(package.as_str()) {
        problems.push(format!("package `{}` is listed twice", package));
      }
    }
    if problems.is_empty() {
      Ok(())
    } else {
      Err(InvalidSpecificationError { problems })
    }
  }
}
