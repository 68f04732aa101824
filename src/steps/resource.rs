//! Generic "create one external resource" step.

use async_trait::async_trait;
use std::sync::Arc;

use crate::cancel::CancelFlag;
use crate::clients::{CreateRequest, ServiceClient};
use crate::error::{ClientError, StepError};
use crate::retry::{RetryPolicy, retry_transient};
use crate::step::{StepAction, StepContext};
use crate::types::{ResourceLedgerEntry, ResourceType};

/// Deletes a ledgered resource, retrying transient errors. An already-missing resource counts
/// as compensated. Rollback ignores the run's cancel flag: it must run after a cancel.
pub async fn delete_resource(
  client: &dyn ServiceClient,
  retry: RetryPolicy,
  entry: &ResourceLedgerEntry,
) -> Result<(), StepError> {
  let never = CancelFlag::new();
  let what = format!("delete {}", entry.resource_type);
  match retry_transient(retry, &never, &what, || client.delete(&entry.identifier)).await {
    Ok(()) | Err(StepError::Client(ClientError::NotFound(_))) => Ok(()),
    Err(e) => Err(e),
  }
}

/// Creates one resource through `client`, ledgers it, and optionally resolves a deferred key
/// with its URL (or identifier when the service returns no URL).
pub struct CreateResource {
  client: Arc<dyn ServiceClient>,
  resource_type: ResourceType,
  request: CreateRequest,
  /// (request attribute, deferred key) pairs filled in before creating.
  inputs: Vec<(String, String)>,
  resolves: Option<String>,
  retry: RetryPolicy,
}

impl CreateResource {
  pub fn new(
    client: Arc<dyn ServiceClient>,
    resource_type: ResourceType,
    request: CreateRequest,
    retry: RetryPolicy,
  ) -> Self {
    Self {
      client,
      resource_type,
      request,
      inputs: Vec::new(),
      resolves: None,
      retry,
    }
  }

  /// Sets request attribute `attribute` from deferred value `key` at run time.
  pub fn input(mut self, attribute: impl Into<String>, key: impl Into<String>) -> Self {
    self.inputs.push((attribute.into(), key.into()));
    self
  }

  pub fn resolving(mut self, key: impl Into<String>) -> Self {
    self.resolves = Some(key.into());
    self
  }
}

#[async_trait]
impl StepAction for CreateResource {
  async fn run(&self, ctx: &StepContext) -> Result<(), StepError> {
    let mut request = self.request.clone();
    for (attribute, key) in &self.inputs {
      let value = ctx.await_value(key).await?;
      request.attributes.insert(attribute.clone(), value);
    }
    ctx.checkpoint()?;

    let what = format!("create {}", self.resource_type);
    let created = retry_transient(self.retry, ctx.cancel_flag(), &what, || {
      self.client.create(&request)
    })
    .await?;
    ctx.record(self.resource_type, &created.identifier)?;
    ctx.report(format!(
      "created {} `{}`",
      self.resource_type, created.identifier
    ));

    if let Some(key) = &self.resolves {
      let value = created.url.unwrap_or(created.identifier);
      ctx.resolve(key, value)?;
    }
    Ok(())
  }

  async fn compensate(&self, entry: &ResourceLedgerEntry) -> Result<(), StepError> {
    delete_resource(self.client.as_ref(), self.retry, entry).await
  }
}
