//! Gate on locally installed tooling.

use async_trait::async_trait;
use std::sync::Arc;

use crate::clients::PrerequisiteChecker;
use crate::error::StepError;
use crate::retry::{RetryPolicy, retry_transient};
use crate::step::{StepAction, StepContext};

/// Fails when any required tool is missing.
pub struct CheckPrerequisites {
  checker: Arc<dyn PrerequisiteChecker>,
  tools: Vec<String>,
  retry: RetryPolicy,
}

impl CheckPrerequisites {
  pub fn new(
    checker: Arc<dyn PrerequisiteChecker>,
    tools: Vec<String>,
    retry: RetryPolicy,
  ) -> Self {
    Self {
      checker,
      tools,
      retry,
    }
  }
}

#[async_trait]
impl StepAction for CheckPrerequisites {
  async fn run(&self, ctx: &StepContext) -> Result<(), StepError> {
    let mut missing = Vec::new();
    for tool in &self.tools {
      let available = retry_transient(self.retry, ctx.cancel_flag(), "check prerequisite", || {
        self.checker.is_available(tool)
      })
      .await?;
      if !available {
        missing.push(tool.as_str());
      }
    }
    if !missing.is_empty() {
      return Err(StepError::External(format!(
        "missing required tools: {}",
        missing.join(", ")
      )));
    }
    ctx.report(format!("{} prerequisites present", self.tools.len()));
    Ok(())
  }
}
