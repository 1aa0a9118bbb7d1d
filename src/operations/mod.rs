//! Imperative operations.
//!
//! Queue, encryption, token, erasure-request, artifact, prune and status
//! commands are not declarative resources: each one maps to a single
//! `multiflexi-cli` invocation. They are run by the [`OperationRunner`], which honours check
//! mode for the mutating ones.

mod runner;

pub use runner::{OperationOutcome, OperationRunner};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::transport::Invocation;

/// Status filter for erasure request listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErasureStatus {
    /// Awaiting review.
    Pending,
    /// Approved, not yet processed.
    Approved,
    /// Rejected by a reviewer.
    Rejected,
    /// Data has been erased.
    Processed,
}

impl ErasureStatus {
    /// Returns the status as passed to `multiflexi-cli`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Processed => "processed",
        }
    }
}

/// How user data is erased.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DeletionType {
    /// Anonymise and deactivate.
    #[default]
    Soft,
    /// Delete permanently.
    Hard,
}

impl DeletionType {
    /// Returns the type as passed to `multiflexi-cli`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }
}

/// One imperative operation, as written under `operations:` in a task file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Show the job queue.
    QueueList,
    /// Empty the job queue.
    QueueTruncate,
    /// Show encryption key status.
    EncryptionStatus,
    /// Initialise encryption keys.
    EncryptionInit,
    /// Generate an API token for a user.
    TokenGenerate {
        /// Owner of the new token.
        user_id: Option<u64>,
    },
    /// List data erasure requests.
    ErasureList {
        /// Only requests in this status.
        status: Option<ErasureStatus>,
    },
    /// File a data erasure request.
    ErasureCreate {
        /// Target user by id.
        user_id: Option<u64>,
        /// Target user by login.
        user_login: Option<String>,
        /// Soft or hard deletion.
        #[serde(default)]
        deletion_type: DeletionType,
        /// Reason recorded with the request.
        reason: Option<String>,
    },
    /// Approve a pending request.
    ErasureApprove {
        /// Request to approve.
        request_id: Option<u64>,
        /// Reviewer notes.
        notes: Option<String>,
    },
    /// Reject a pending request.
    ErasureReject {
        /// Request to reject.
        request_id: Option<u64>,
        /// Reviewer notes.
        notes: Option<String>,
    },
    /// Carry out an approved request.
    ErasureProcess {
        /// Request to process.
        request_id: Option<u64>,
        /// Process even if not approved.
        #[serde(default)]
        force: bool,
    },
    /// Show the audit trail of a request.
    ErasureAudit {
        /// Request to audit.
        request_id: Option<u64>,
        /// Also write the trail to this file.
        export_audit: Option<String>,
    },
    /// Remove completed requests.
    ErasureCleanup,
    /// Prune old job records and logs.
    Prune {
        /// Prune logs.
        #[serde(default)]
        logs: bool,
        /// Prune jobs.
        #[serde(default)]
        jobs: bool,
        /// Records to keep.
        #[serde(default = "default_keep")]
        keep: u64,
    },
    /// List job artifacts.
    ArtifactList {
        /// Only artifacts of this job.
        job_id: Option<u64>,
        /// Comma-separated columns to return.
        fields: Option<String>,
    },
    /// Show one job artifact.
    ArtifactGet {
        /// Artifact to show.
        id: Option<u64>,
        /// Comma-separated columns to return.
        fields: Option<String>,
    },
    /// Show MultiFlexi system status.
    SystemStatus,
    /// Show component versions and health as reported by `appstatus`.
    AppStatus,
}

const ERASURE: &str = "user:data-erasure";

const fn default_keep() -> u64 {
    1000
}

impl Operation {
    /// Returns the key the payload is reported under.
    #[must_use]
    pub const fn subject(&self) -> &'static str {
        match self {
            Self::QueueList | Self::QueueTruncate => "queue",
            Self::EncryptionStatus | Self::EncryptionInit => "encryption",
            Self::TokenGenerate { .. } => "token",
            Self::ErasureList { .. }
            | Self::ErasureCreate { .. }
            | Self::ErasureApprove { .. }
            | Self::ErasureReject { .. }
            | Self::ErasureProcess { .. }
            | Self::ErasureAudit { .. }
            | Self::ErasureCleanup => "erasure_request",
            Self::ArtifactList { .. } | Self::ArtifactGet { .. } => "artifact",
            Self::Prune { .. } => "prune_result",
            Self::SystemStatus => "status",
            Self::AppStatus => "multiflexi",
        }
    }

    /// Returns a short name, e.g. `queue truncate`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::QueueList => "queue list",
            Self::QueueTruncate => "queue truncate",
            Self::EncryptionStatus => "encryption status",
            Self::EncryptionInit => "encryption init",
            Self::TokenGenerate { .. } => "token generate",
            Self::ErasureList { .. } => "erasure list",
            Self::ErasureCreate { .. } => "erasure create",
            Self::ErasureApprove { .. } => "erasure approve",
            Self::ErasureReject { .. } => "erasure reject",
            Self::ErasureProcess { .. } => "erasure process",
            Self::ErasureAudit { .. } => "erasure audit",
            Self::ErasureCleanup => "erasure cleanup",
            Self::ArtifactList { .. } => "artifact list",
            Self::ArtifactGet { .. } => "artifact get",
            Self::Prune { .. } => "prune",
            Self::SystemStatus => "status",
            Self::AppStatus => "appstatus",
        }
    }

    /// Returns true if the operation changes backend state.
    ///
    /// An audit is a read unless it exports the trail to a file.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        match self {
            Self::QueueList
            | Self::EncryptionStatus
            | Self::ErasureList { .. }
            | Self::ArtifactList { .. }
            | Self::ArtifactGet { .. }
            | Self::SystemStatus
            | Self::AppStatus => false,
            Self::ErasureAudit { export_audit, .. } => export_audit.is_some(),
            _ => true,
        }
    }

    /// Checks that the parameters the operation needs are present.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the missing parameter.
    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str| -> Result<()> {
            Err(ValidationError::MissingField {
                kind: self.subject().to_string(),
                operation: self.name().to_string(),
                field: field.to_string(),
            }
            .into())
        };

        match self {
            Self::TokenGenerate { user_id: None } => missing("user_id"),
            Self::ErasureCreate {
                user_id: None,
                user_login: None,
                ..
            } => missing("user_id or user_login"),
            Self::ErasureApprove {
                request_id: None, ..
            }
            | Self::ErasureReject {
                request_id: None, ..
            }
            | Self::ErasureProcess {
                request_id: None, ..
            }
            | Self::ErasureAudit {
                request_id: None, ..
            } => missing("request_id"),
            Self::ArtifactGet { id: None, .. } => missing("id"),
            Self::Prune {
                logs: false,
                jobs: false,
                ..
            } => Err(ValidationError::InvalidValue {
                field: String::from("logs/jobs"),
                message: String::from("at least one of logs or jobs must be enabled"),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Builds the `multiflexi-cli` invocation.
    #[must_use]
    pub fn invocation(&self) -> Invocation {
        match self {
            Self::QueueList => Invocation::new(["queue", "list"]),
            Self::QueueTruncate => Invocation::new(["queue", "truncate"]),
            Self::EncryptionStatus => Invocation::new(["encryption", "status"]),
            Self::EncryptionInit => Invocation::new(["encryption", "init"]),
            Self::TokenGenerate { user_id } => Invocation::new(["token", "generate"])
                .flag_opt("user", user_id.map(|id| id.to_string())),
            Self::ErasureList { status } => Invocation::new([ERASURE, "list"])
                .flag_opt("status", status.map(ErasureStatus::as_str)),
            Self::ErasureCreate {
                user_id,
                user_login,
                deletion_type,
                reason,
            } => {
                let invocation = Invocation::new([ERASURE, "create"])
                    .flag("deletion-type", deletion_type.as_str());
                let invocation = match (user_id, user_login) {
                    (Some(id), _) => invocation.flag("user-id", id.to_string()),
                    (None, login) => invocation.flag_opt("user-login", login.clone()),
                };
                invocation.flag_opt("reason", reason.clone())
            }
            Self::ErasureApprove { request_id, notes } => Invocation::new([ERASURE, "approve"])
                .flag_opt("request-id", request_id.map(|id| id.to_string()))
                .flag_opt("notes", notes.clone()),
            Self::ErasureReject { request_id, notes } => Invocation::new([ERASURE, "reject"])
                .flag_opt("request-id", request_id.map(|id| id.to_string()))
                .flag_opt("notes", notes.clone()),
            Self::ErasureProcess { request_id, force } => Invocation::new([ERASURE, "process"])
                .flag_opt("request-id", request_id.map(|id| id.to_string()))
                .switch("force", *force),
            Self::ErasureAudit {
                request_id,
                export_audit,
            } => Invocation::new([ERASURE, "audit"])
                .flag_opt("request-id", request_id.map(|id| id.to_string()))
                .flag_opt("export-audit", export_audit.clone()),
            Self::ErasureCleanup => Invocation::new([ERASURE, "cleanup"]),
            Self::Prune { logs, jobs, keep } => Invocation::new(["prune"])
                .switch("logs", *logs)
                .switch("jobs", *jobs)
                .flag("keep", keep.to_string()),
            Self::ArtifactList { job_id, fields } => Invocation::new(["artifact", "list"])
                .flag_opt("job_id", job_id.map(|id| id.to_string()))
                .flag_opt("fields", fields.clone()),
            Self::ArtifactGet { id, fields } => Invocation::new(["artifact", "get"])
                .flag_opt("id", id.map(|id| id.to_string()))
                .flag_opt("fields", fields.clone()),
            Self::SystemStatus => Invocation::new(["status"]),
            Self::AppStatus => Invocation::new(["appstatus"]),
        }
    }

    /// Message reported after a successful run.
    #[must_use]
    pub fn done_message(&self) -> String {
        match self {
            Self::QueueList => String::from("Retrieved queue status"),
            Self::QueueTruncate => String::from("Truncated job queue"),
            Self::EncryptionStatus => String::from("Retrieved encryption status"),
            Self::EncryptionInit => String::from("Initialized encryption keys"),
            Self::TokenGenerate { user_id } => {
                format!("Generated new token for user {}", display_id(*user_id))
            }
            Self::ErasureList { .. } => String::from("Retrieved erasure request list"),
            Self::ErasureCreate { .. } => String::from("Created erasure request"),
            Self::ErasureApprove { request_id, .. } => {
                format!("Approved erasure request {}", display_id(*request_id))
            }
            Self::ErasureReject { request_id, .. } => {
                format!("Rejected erasure request {}", display_id(*request_id))
            }
            Self::ErasureProcess { request_id, .. } => {
                format!("Processed erasure request {}", display_id(*request_id))
            }
            Self::ErasureAudit { request_id, .. } => {
                format!("Retrieved audit trail for request {}", display_id(*request_id))
            }
            Self::ErasureCleanup => String::from("Cleaned up completed erasure requests"),
            Self::Prune { keep, .. } => {
                format!("Pruned {}, kept {keep} records", self.prune_targets())
            }
            Self::ArtifactList { job_id: Some(job_id), .. } => {
                format!("Retrieved artifacts of job {job_id}")
            }
            Self::ArtifactList { job_id: None, .. } => String::from("Retrieved artifact list"),
            Self::ArtifactGet { id, .. } => format!("Retrieved artifact {}", display_id(*id)),
            Self::SystemStatus => String::from("Retrieved MultiFlexi system status"),
            Self::AppStatus => String::from("Retrieved MultiFlexi application status"),
        }
    }

    /// Message reported in check mode for a mutating operation.
    #[must_use]
    pub fn check_message(&self) -> String {
        match self {
            Self::QueueTruncate => String::from("Would truncate the job queue"),
            Self::EncryptionInit => String::from("Would initialize encryption keys"),
            Self::TokenGenerate { user_id } => {
                format!("Would generate a new token for user {}", display_id(*user_id))
            }
            Self::ErasureCreate { .. } => String::from("Would create erasure request for user"),
            Self::ErasureApprove { request_id, .. } => {
                format!("Would approve erasure request {}", display_id(*request_id))
            }
            Self::ErasureReject { request_id, .. } => {
                format!("Would reject erasure request {}", display_id(*request_id))
            }
            Self::ErasureProcess { request_id, .. } => {
                format!("Would process erasure request {}", display_id(*request_id))
            }
            Self::ErasureAudit {
                request_id,
                export_audit,
            } => format!(
                "Would export audit trail for request {} to {}",
                display_id(*request_id),
                export_audit.as_deref().unwrap_or("-")
            ),
            Self::ErasureCleanup => String::from("Would cleanup completed erasure requests"),
            Self::Prune { keep, .. } => {
                format!("Would prune {}, keeping {keep} records", self.prune_targets())
            }
            _ => format!("Would run {}", self.name()),
        }
    }

    fn prune_targets(&self) -> String {
        match self {
            Self::Prune { logs, jobs, .. } => [(*logs, "logs"), (*jobs, "jobs")]
                .iter()
                .filter(|(enabled, _)| *enabled)
                .map(|(_, name)| *name)
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        }
    }
}

fn display_id(id: Option<u64>) -> String {
    id.map_or_else(|| String::from("?"), |id| id.to_string())
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_operations() {
        let yaml = r"
- op: queue_truncate
- op: token_generate
  user_id: 3
- op: erasure_create
  user_login: jdoe
  deletion_type: hard
- op: prune
  logs: true
- op: artifact_get
  id: 456
";
        let ops: Vec<Operation> = serde_yaml::from_str(yaml).expect("valid operations");
        assert_eq!(ops[0], Operation::QueueTruncate);
        assert_eq!(ops[1], Operation::TokenGenerate { user_id: Some(3) });
        assert!(matches!(
            ops[2],
            Operation::ErasureCreate {
                deletion_type: DeletionType::Hard,
                ..
            }
        ));
        assert!(matches!(ops[3], Operation::Prune { keep: 1000, .. }));
        assert_eq!(
            ops[4],
            Operation::ArtifactGet {
                id: Some(456),
                fields: None
            }
        );
    }

    #[test]
    fn test_validation() {
        assert!(Operation::TokenGenerate { user_id: None }.validate().is_err());
        assert!(Operation::ErasureApprove {
            request_id: None,
            notes: None
        }
        .validate()
        .is_err());
        assert!(Operation::ErasureCreate {
            user_id: None,
            user_login: Some(String::from("jdoe")),
            deletion_type: DeletionType::Soft,
            reason: None,
        }
        .validate()
        .is_ok());
        assert!(Operation::Prune {
            logs: false,
            jobs: false,
            keep: 10
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_invocations() {
        let create = Operation::ErasureCreate {
            user_id: Some(7),
            user_login: Some(String::from("ignored")),
            deletion_type: DeletionType::Soft,
            reason: Some(String::from("GDPR")),
        };
        assert_eq!(
            create.invocation().to_string(),
            "user:data-erasure create --deletion-type soft --user-id 7 --reason GDPR"
        );

        let process = Operation::ErasureProcess {
            request_id: Some(4),
            force: true,
        };
        assert_eq!(
            process.invocation().to_string(),
            "user:data-erasure process --request-id 4 --force"
        );

        let prune = Operation::Prune {
            logs: true,
            jobs: true,
            keep: 50,
        };
        assert_eq!(prune.invocation().to_string(), "prune --logs --jobs --keep 50");
    }

    #[test]
    fn test_artifact_and_appstatus_invocations() {
        let list = Operation::ArtifactList {
            job_id: Some(123),
            fields: Some(String::from("id,filename")),
        };
        assert_eq!(
            list.invocation().to_string(),
            "artifact list --job_id 123 --fields id,filename"
        );
        assert!(!list.is_mutating());

        let get = Operation::ArtifactGet {
            id: None,
            fields: None,
        };
        assert!(get.validate().is_err());

        assert_eq!(Operation::AppStatus.invocation().to_string(), "appstatus");
        assert_eq!(Operation::AppStatus.subject(), "multiflexi");
        assert!(!Operation::AppStatus.is_mutating());
    }

    #[test]
    fn test_audit_is_mutating_only_when_exporting() {
        let read = Operation::ErasureAudit {
            request_id: Some(1),
            export_audit: None,
        };
        let export = Operation::ErasureAudit {
            request_id: Some(1),
            export_audit: Some(String::from("/tmp/audit.json")),
        };
        assert!(!read.is_mutating());
        assert!(export.is_mutating());
        assert!(Operation::QueueTruncate.is_mutating());
        assert!(!Operation::SystemStatus.is_mutating());
    }

    #[test]
    fn test_messages() {
        let prune = Operation::Prune {
            logs: true,
            jobs: false,
            keep: 100,
        };
        assert_eq!(prune.check_message(), "Would prune logs, keeping 100 records");
        assert_eq!(prune.done_message(), "Pruned logs, kept 100 records");
        assert_eq!(Operation::QueueTruncate.done_message(), "Truncated job queue");
    }
}
