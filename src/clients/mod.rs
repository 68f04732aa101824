//! Narrow capability interfaces the steps use to reach external services.
//!
//! Protocol details live behind [ServiceClient]; steps only `create`, `configure` and `delete`.

mod fs;
mod simulated;


pub use fs::{FsArtifactWriter, FsDirectoryService, PATH_ATTRIBUTE};
pub use simulated::{
  MemoryArtifactWriter, ServiceCall, SimulatedEnvironment, SimulatedService, StaticPrerequisites,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::ClientError;
use crate::types::ResourceType;

/// External service a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
  SourceControl,
  ContentPlatform,
  EdgeConfig,
  ApiMesh,
  Workspace,
  PackageManager,
}

impl ServiceKind {
  pub const ALL: [ServiceKind; 6] = [
    ServiceKind::SourceControl,
    ServiceKind::ContentPlatform,
    ServiceKind::EdgeConfig,
    ServiceKind::ApiMesh,
    ServiceKind::Workspace,
    ServiceKind::PackageManager,
  ];

  /// Service that owns resources of `resource_type`.
  pub fn owning(resource_type: ResourceType) -> Self {
    match resource_type {
      ResourceType::Repository => ServiceKind::SourceControl,
      ResourceType::HostedContentSite => ServiceKind::ContentPlatform,
      ResourceType::EdgeConfigBinding => ServiceKind::EdgeConfig,
      ResourceType::DeployedEndpoint => ServiceKind::ApiMesh,
      ResourceType::LocalDirectory => ServiceKind::Workspace,
      ResourceType::InstalledPackage => ServiceKind::PackageManager,
    }
  }
}

impl fmt::Display for ServiceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ServiceKind::SourceControl => "source-control",
      ServiceKind::ContentPlatform => "content-platform",
      ServiceKind::EdgeConfig => "edge-config",
      ServiceKind::ApiMesh => "api-mesh",
      ServiceKind::Workspace => "workspace",
      ServiceKind::PackageManager => "package-manager",
    };
    f.write_str(s)
  }
}

impl std::str::FromStr for ServiceKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ServiceKind::ALL
      .into_iter()
      .find(|k| k.to_string() == s)
      .ok_or_else(|| format!("unknown service `{s}`"))
  }
}

/// What to create.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateRequest {
  pub name: String,
  pub attributes: BTreeMap<String, String>,
}

impl CreateRequest {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      attributes: BTreeMap::new(),
    }
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.attributes.insert(key.into(), value.into());
    self
  }
}

/// A resource the service confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
  /// Identifier the same service accepts in `configure` and `delete`.
  pub identifier: String,
  pub url: Option<String>,
}

/// Per-service client, exposed to steps as a capability.
#[async_trait]
pub trait ServiceClient: Send + Sync {
  fn service(&self) -> ServiceKind;

  /// Creates a resource. Returns only once the service has confirmed it.
  async fn create(&self, request: &CreateRequest) -> Result<CreatedResource, ClientError>;

  /// Applies settings to an existing resource.
  async fn configure(
    &self,
    identifier: &str,
    settings: &BTreeMap<String, String>,
  ) -> Result<(), ClientError>;

  /// Deletes a resource. [ClientError::NotFound] means it is already gone.
  async fn delete(&self, identifier: &str) -> Result<(), ClientError>;
}

/// Prerequisite-verification collaborator. Caching is its own concern.
#[async_trait]
pub trait PrerequisiteChecker: Send + Sync {
  async fn is_available(&self, tool: &str) -> Result<bool, ClientError>;
}

/// Destination of the definitive project configuration artifact.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
  async fn write(&self, project_dir: &Path, name: &str, contents: &str) -> Result<(), ClientError>;
}

/// All collaborators a run needs.
#[derive(Clone)]
pub struct Services {
  pub source_control: Arc<dyn ServiceClient>,
  pub content: Arc<dyn ServiceClient>,
  pub edge: Arc<dyn ServiceClient>,
  pub api_mesh: Arc<dyn ServiceClient>,
  pub workspace: Arc<dyn ServiceClient>,
  pub packages: Arc<dyn ServiceClient>,
  pub prerequisites: Arc<dyn PrerequisiteChecker>,
  pub artifacts: Arc<dyn ArtifactWriter>,
}

impl fmt::Debug for Services {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Services").finish_non_exhaustive()
  }
}

impl Services {
  pub fn client(&self, kind: ServiceKind) -> Arc<dyn ServiceClient> {
    let client = match kind {
      ServiceKind::SourceControl => &self.source_control,
      ServiceKind::ContentPlatform => &self.content,
      ServiceKind::EdgeConfig => &self.edge,
      ServiceKind::ApiMesh => &self.api_mesh,
      ServiceKind::Workspace => &self.workspace,
      ServiceKind::PackageManager => &self.packages,
    };
    Arc::clone(client)
  }

  /// Client able to delete resources of `resource_type`.
  pub fn client_for(&self, resource_type: ResourceType) -> Arc<dyn ServiceClient> {
    self.client(ServiceKind::owning(resource_type))
  }
}
