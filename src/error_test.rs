//! Tests for the error taxonomy.

use crate::cancel::CancelReason;
use crate::error::{
  ClientError, DeferredError, DeferredValueConflictError, InvalidSpecificationError,
  ProvisionError, StepError,
};

fn conflict() -> DeferredValueConflictError {
  DeferredValueConflictError {
    key: "endpoint-url".to_string(),
    resolved_by: "deploy-api-mesh".to_string(),
    attempted_by: "rogue".to_string(),
  }
}

#[test]
fn invalid_spec_lists_every_problem() {
  let e = InvalidSpecificationError {
    problems: vec!["owner is required".to_string(), "template is required".to_string()],
  };
  assert_eq!(
    e.to_string(),
    "invalid provisioning spec: owner is required; template is required"
  );
}

#[test]
fn conflict_from_step_becomes_its_own_verdict() {
  let v = ProvisionError::from_step("rogue", StepError::Conflict(conflict()));
  assert_eq!(v, ProvisionError::DeferredValueConflict(conflict()));
}

#[test]
fn other_step_errors_name_the_step() {
  let v = ProvisionError::from_step(
    "deploy-api-mesh",
    StepError::Client(ClientError::Permanent("quota exceeded".to_string())),
  );
  assert_eq!(
    v.to_string(),
    "step `deploy-api-mesh` failed: quota exceeded"
  );
}

#[test]
fn deferred_errors_map_into_step_errors() {
  let abandoned: StepError = DeferredError::Abandoned {
    key: "k".to_string(),
  }
  .into();
  assert!(abandoned.is_interruption());
  let conflict: StepError = DeferredError::AlreadyResolved(conflict()).into();
  assert!(matches!(conflict, StepError::Conflict(_)));
  assert!(!conflict.is_interruption());
}

#[test]
fn only_transient_client_errors_are_retryable() {
  assert!(ClientError::Transient("503".to_string()).is_transient());
  assert!(!ClientError::Permanent("400".to_string()).is_transient());
  assert!(!ClientError::NotFound("gone".to_string()).is_transient());
}

#[test]
fn provision_error_serializes_for_the_terminal_event() {
  let e = ProvisionError::Cancelled {
    reason: CancelReason::Watchdog,
  };
  let json = serde_json::to_value(&e).unwrap();
  let back: ProvisionError = serde_json::from_value(json).unwrap();
  assert_eq!(back, e);
}
