//! Local package installation: independent sub-tasks with bounded concurrency.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::resource::delete_resource;
use crate::clients::{CreateRequest, PATH_ATTRIBUTE, PrerequisiteChecker, ServiceClient};
use crate::error::StepError;
use crate::retry::{RetryPolicy, retry_transient};
use crate::step::{StepAction, StepContext};
use crate::types::{ResourceLedgerEntry, ResourceType};

/// Installs every requested package that is not already present.
///
/// Each package is ledgered as soon as its install is confirmed, so packages installed by
/// sibling sub-tasks are still rolled back when another sub-task fails.
pub struct InstallPackages {
  installer: Arc<dyn ServiceClient>,
  checker: Arc<dyn PrerequisiteChecker>,
  packages: Vec<String>,
  project_dir: PathBuf,
  max_concurrent: usize,
  retry: RetryPolicy,
}

impl InstallPackages {
  pub fn new(
    installer: Arc<dyn ServiceClient>,
    checker: Arc<dyn PrerequisiteChecker>,
    packages: Vec<String>,
    project_dir: PathBuf,
    max_concurrent: usize,
    retry: RetryPolicy,
  ) -> Self {
    Self {
      installer,
      checker,
      packages,
      project_dir,
      max_concurrent: max_concurrent.max(1),
      retry,
    }
  }

  async fn missing(&self) -> Vec<String> {
    let mut missing = Vec::new();
    for package in &self.packages {
      match self.checker.is_available(package).await {
        Ok(true) => {}
        Ok(false) => missing.push(package.clone()),
        Err(e) => {
          warn!(package = %package, error = %e, "package check failed, installing anyway");
          missing.push(package.clone());
        }
      }
    }
    missing
  }

  async fn install_one(&self, ctx: &StepContext, package: String) -> Result<(), StepError> {
    ctx.checkpoint()?;
    let request = CreateRequest::named(&package)
      .with(PATH_ATTRIBUTE, self.project_dir.display().to_string());
    let what = format!("install {package}");
    let installed = retry_transient(self.retry, ctx.cancel_flag(), &what, || {
      self.installer.create(&request)
    })
    .await?;
    ctx.record(ResourceType::InstalledPackage, &installed.identifier)?;
    debug!(package = %package, identifier = %installed.identifier, "package installed");
    ctx.report(format!("installed {package}"));
    Ok(())
  }
}

#[async_trait]
impl StepAction for InstallPackages {
  /// Runs only when at least one package is missing.
  async fn precondition(&self, _ctx: &StepContext) -> bool {
    !self.missing().await.is_empty()
  }

  async fn run(&self, ctx: &StepContext) -> Result<(), StepError> {
    let missing = self.missing().await;
    let total = missing.len();
    let results: Vec<(String, Result<(), StepError>)> = futures::stream::iter(missing)
      .map(|package| async move {
        let result = self.install_one(ctx, package.clone()).await;
        (package, result)
      })
      .buffer_unordered(self.max_concurrent)
      .collect()
      .await;

    let failures: Vec<(String, StepError)> = results
      .into_iter()
      .filter_map(|(package, result)| result.err().map(|e| (package, e)))
      .collect();
    if failures.is_empty() {
      return Ok(());
    }
    if ctx.cancel_flag().is_requested() && failures.iter().all(|(_, e)| e.is_interruption()) {
      return Err(StepError::Cancelled);
    }
    Err(StepError::SubTasks {
      failed: failures.len(),
      total,
      errors: failures
        .into_iter()
        .map(|(package, e)| format!("{package}: {e}"))
        .collect(),
    })
  }

  async fn compensate(&self, entry: &ResourceLedgerEntry) -> Result<(), StepError> {
    delete_resource(self.installer.as_ref(), self.retry, entry).await
  }
}
