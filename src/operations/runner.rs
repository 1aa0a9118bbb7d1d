//! Runs imperative operations through a transport.

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::{BackendError, Result};
use crate::resource::Record;
use crate::transport::{is_not_found_marker, Transport};

use super::{display_id, Operation};

/// Result of one imperative operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome {
    /// Key the payload is reported under (`queue`, `erasure_request`, ...).
    pub kind: &'static str,
    /// Operation name.
    pub operation: &'static str,
    /// Whether backend state changed (or would change in check mode).
    pub changed: bool,
    /// Raw backend response.
    pub payload: Value,
    /// Human-readable summary.
    pub message: String,
    /// Whether the operation ran in check mode.
    pub check_mode: bool,
}

impl OperationOutcome {
    /// Builds the result envelope `{ changed, <kind>: payload, msg }`.
    #[must_use]
    pub fn to_envelope(&self) -> Value {
        let mut envelope = Record::new();
        envelope.insert(String::from("changed"), Value::Bool(self.changed));
        envelope.insert(self.kind.to_string(), self.payload.clone());
        envelope.insert(String::from("msg"), Value::String(self.message.clone()));
        Value::Object(envelope)
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

/// Runs operations, skipping mutating ones in check mode.
pub struct OperationRunner<'a, T: Transport + ?Sized> {
    transport: &'a T,
    check_mode: bool,
}

impl<'a, T: Transport + ?Sized> OperationRunner<'a, T> {
    /// Creates a new runner.
    #[must_use]
    pub const fn new(transport: &'a T) -> Self {
        Self {
            transport,
            check_mode: false,
        }
    }

    /// Enables or disables check mode.
    #[must_use]
    pub const fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    /// Runs one operation.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a required parameter is missing, or the
    /// backend error if the command fails.
    pub async fn run(&self, operation: &Operation) -> Result<OperationOutcome> {
        operation.validate()?;

        let mutating = operation.is_mutating();
        if mutating && self.check_mode {
            return Ok(self.outcome(operation, true, Value::Null, operation.check_message()));
        }

        let invocation = operation.invocation();
        if mutating {
            info!("Running {invocation}");
        }
        let payload = self.transport.invoke(&invocation).await?;

        if let Operation::ArtifactGet { id, .. } = operation {
            if is_not_found_marker(&payload) {
                return Err(BackendError::api_error(
                    404,
                    format!("Artifact with ID {} not found", display_id(*id)),
                )
                .into());
            }
        }

        Ok(self.outcome(operation, mutating, payload, operation.done_message()))
    }

    fn outcome(
        &self,
        operation: &Operation,
        changed: bool,
        payload: Value,
        message: String,
    ) -> OperationOutcome {
        OperationOutcome {
            kind: operation.subject(),
            operation: operation.name(),
            changed,
            payload,
            message,
            check_mode: self.check_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MultiflexiError;
    use crate::operations::ErasureStatus;
    use crate::transport::MockTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_operation_runs_in_check_mode() {
        let mut mock = MockTransport::new();
        mock.expect_invoke()
            .withf(|invocation| invocation.to_string() == "user:data-erasure list --status pending")
            .times(1)
            .returning(|_| Ok(json!([{ "id": 1, "status": "pending" }])));

        let outcome = OperationRunner::new(&mock)
            .with_check_mode(true)
            .run(&Operation::ErasureList {
                status: Some(ErasureStatus::Pending),
            })
            .await
            .expect("run");

        assert!(!outcome.changed);
        assert_eq!(outcome.kind, "erasure_request");
        assert_eq!(outcome.message, "Retrieved erasure request list");
    }

    #[tokio::test]
    async fn test_mutating_operation_skipped_in_check_mode() {
        let mut mock = MockTransport::new();
        mock.expect_invoke().never();

        let outcome = OperationRunner::new(&mock)
            .with_check_mode(true)
            .run(&Operation::QueueTruncate)
            .await
            .expect("run");

        assert!(outcome.changed);
        assert_eq!(outcome.message, "Would truncate the job queue");
        assert_eq!(
            outcome.to_envelope(),
            json!({ "changed": true, "queue": null, "msg": "Would truncate the job queue" })
        );
    }

    #[tokio::test]
    async fn test_mutating_operation_reports_change() {
        let mut mock = MockTransport::new();
        mock.expect_invoke()
            .times(1)
            .returning(|_| Ok(json!({ "token": "abc" })));

        let outcome = OperationRunner::new(&mock)
            .run(&Operation::TokenGenerate { user_id: Some(2) })
            .await
            .expect("run");

        assert!(outcome.changed);
        assert_eq!(outcome.payload, json!({ "token": "abc" }));
        assert_eq!(outcome.message, "Generated new token for user 2");
    }

    #[tokio::test]
    async fn test_audit_export_reports_change() {
        let mut mock = MockTransport::new();
        mock.expect_invoke().times(1).returning(|_| Ok(json!([])));

        let outcome = OperationRunner::new(&mock)
            .run(&Operation::ErasureAudit {
                request_id: Some(9),
                export_audit: Some(String::from("/var/tmp/audit-9.json")),
            })
            .await
            .expect("run");
        assert!(outcome.changed);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_an_error() {
        let mut mock = MockTransport::new();
        mock.expect_invoke()
            .withf(|invocation| invocation.to_string() == "artifact get --id 456")
            .times(1)
            .returning(|_| Ok(json!({ "status": "not found" })));

        let err = OperationRunner::new(&mock)
            .run(&Operation::ArtifactGet {
                id: Some(456),
                fields: None,
            })
            .await
            .expect_err("missing artifact");
        assert!(err.to_string().contains("Artifact with ID 456 not found"));
        assert_eq!(err.return_code(), Some(404));
    }

    #[tokio::test]
    async fn test_appstatus_reports_under_multiflexi() {
        let mut mock = MockTransport::new();
        mock.expect_invoke()
            .withf(|invocation| invocation.to_string() == "appstatus")
            .times(1)
            .returning(|_| Ok(json!({ "version": "2.1.0", "database": "ok" })));

        let outcome = OperationRunner::new(&mock)
            .with_check_mode(true)
            .run(&Operation::AppStatus)
            .await
            .expect("run");

        assert!(!outcome.changed);
        assert_eq!(
            outcome.to_envelope()["multiflexi"]["version"],
            json!("2.1.0")
        );
    }

    #[tokio::test]
    async fn test_invalid_operation_never_invokes() {
        let mut mock = MockTransport::new();
        mock.expect_invoke().never();

        let err = OperationRunner::new(&mock)
            .run(&Operation::ErasureProcess {
                request_id: None,
                force: false,
            })
            .await
            .expect_err("validation");
        assert!(matches!(err, MultiflexiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let mut mock = MockTransport::new();
        mock.expect_invoke().returning(|_| {
            Err(BackendError::Unsupported {
                transport: String::from("http"),
                operation: String::from("'queue list'"),
            }
            .into())
        });

        let err = OperationRunner::new(&mock)
            .run(&Operation::QueueList)
            .await
            .expect_err("unsupported");
        assert!(err.to_string().contains("not supported"));
    }
}
