//! Final step: materializes the project configuration artifact exactly once.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::clients::{ArtifactWriter, ServiceClient};
use crate::error::StepError;
use crate::retry::{RetryPolicy, retry_transient};
use crate::step::{StepAction, StepContext};
use crate::types::{Capability, ProvisionSpec, ResourceType};

/// Repository setting the committed artifact is pushed under.
pub const PROJECT_CONFIG_SETTING: &str = "project-config";

/// Contents of the configuration artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectConfig {
  pub project: String,
  pub owner: String,
  pub template: String,
  pub capabilities: BTreeSet<Capability>,
  pub packages: Vec<String>,
  /// Every deferred value the artifact depends on, by key.
  pub endpoints: BTreeMap<String, String>,
}

/// Awaits every deferred value, writes the artifact once, then pushes it to the repository.
///
/// Nothing is written before all values are resolved; there is no placeholder to rewrite.
pub struct CommitProjectConfig {
  spec: ProvisionSpec,
  keys: Vec<String>,
  artifact_name: String,
  artifacts: Arc<dyn ArtifactWriter>,
  repository: Arc<dyn ServiceClient>,
  retry: RetryPolicy,
}

impl CommitProjectConfig {
  pub fn new(
    spec: ProvisionSpec,
    keys: Vec<String>,
    artifact_name: impl Into<String>,
    artifacts: Arc<dyn ArtifactWriter>,
    repository: Arc<dyn ServiceClient>,
    retry: RetryPolicy,
  ) -> Self {
    Self {
      spec,
      keys,
      artifact_name: artifact_name.into(),
      artifacts,
      repository,
      retry,
    }
  }

  fn project_dir(&self) -> PathBuf {
    self.spec.project_dir.clone()
  }
}

#[async_trait]
impl StepAction for CommitProjectConfig {
  async fn run(&self, ctx: &StepContext) -> Result<(), StepError> {
    let values = futures::future::try_join_all(self.keys.iter().map(|k| ctx.await_value(k))).await?;
    let endpoints: BTreeMap<String, String> = self.keys.iter().cloned().zip(values).collect();
    ctx.checkpoint()?;

    let config = ProjectConfig {
      project: self.spec.project_name.clone(),
      owner: self.spec.owner.clone(),
      template: self.spec.template.clone(),
      capabilities: self.spec.capabilities.clone(),
      packages: self.spec.packages.clone(),
      endpoints,
    };
    let contents = serde_json::to_string_pretty(&config)
      .map_err(|e| StepError::External(format!("serializing project config: {e}")))?;

    let dir = self.project_dir();
    retry_transient(self.retry, ctx.cancel_flag(), "write project config", || {
      self.artifacts.write(&dir, &self.artifact_name, &contents)
    })
    .await?;
    info!(run_id = %ctx.run_id(), artifact = %self.artifact_name, "project config written");

    let repository = ctx
      .ledger()
      .entries_in_creation_order()
      .into_iter()
      .find(|e| e.resource_type == ResourceType::Repository)
      .ok_or_else(|| StepError::External("no repository recorded for this run".to_string()))?;
    let mut settings = BTreeMap::new();
    settings.insert(PROJECT_CONFIG_SETTING.to_string(), contents);
    retry_transient(self.retry, ctx.cancel_flag(), "push project config", || {
      self.repository.configure(&repository.identifier, &settings)
    })
    .await?;
    ctx.report(format!("committed {}", self.artifact_name));
    Ok(())
  }
}
