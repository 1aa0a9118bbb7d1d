//! Configuration types for the task file.
//!
//! These structs map to `multiflexi.yaml`: how to reach the backend, which
//! resources to reconcile and which imperative operations to run afterwards.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::operations::Operation;
use crate::reconciler::DesiredState;
use crate::resource::{Record, ResourceDescriptor, ResourceKind};

/// The root of a task file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MultiflexiConfig {
    /// How to reach the backend.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Resources to reconcile, in order.
    #[serde(default)]
    pub resources: Vec<ResourceTask>,
    /// Imperative operations to run after the resources, in order.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Transport to use.
    #[serde(default)]
    pub transport: TransportKind,
    /// REST API base URL (http transport).
    #[serde(default)]
    pub api_url: Option<String>,
    /// API user (http transport).
    #[serde(default)]
    pub username: Option<String>,
    /// API password (http transport).
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Path to `multiflexi-cli` (cli transport).
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
    /// Timeout for one request or command, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            api_url: None,
            username: None,
            password: None,
            cli_path: default_cli_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Available transports.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// MultiFlexi REST API.
    #[default]
    Http,
    /// `multiflexi-cli` child processes.
    Cli,
}

impl TransportKind {
    /// Returns the transport name as written in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Cli => "cli",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "rest" | "api" => Ok(Self::Http),
            "cli" | "process" => Ok(Self::Cli),
            other => Err(format!("unknown transport '{other}' (expected http or cli)")),
        }
    }
}

/// One resource to reconcile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceTask {
    /// Optional label used in reports.
    #[serde(default)]
    pub name: Option<String>,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Desired state.
    #[serde(default)]
    pub state: DesiredState,
    /// Identity keys.
    #[serde(default)]
    pub identity: Record,
    /// Desired field values.
    #[serde(default)]
    pub fields: Record,
    /// Fields excluded from change detection.
    #[serde(default)]
    pub ignore_fields: Vec<String>,
}

impl ResourceTask {
    /// Builds the descriptor for this task.
    ///
    /// # Errors
    ///
    /// Returns an error if an identity key is unknown for the kind.
    pub fn descriptor(&self) -> Result<ResourceDescriptor> {
        ResourceDescriptor::from_parts(self.kind, &self.identity, &self.fields, &self.ignore_fields)
    }

    /// Returns a label for reports, e.g. `company code=ACME`.
    #[must_use]
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.descriptor()
            .map_or_else(|_| self.kind.to_string(), |d| d.label())
    }
}

fn default_cli_path() -> String {
    String::from("multiflexi-cli")
}

const fn default_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_defaults() {
        let connection = ConnectionConfig::default();
        assert_eq!(connection.transport, TransportKind::Http);
        assert_eq!(connection.cli_path, "multiflexi-cli");
        assert_eq!(connection.timeout_secs, 30);
    }

    #[test]
    fn test_transport_from_str() {
        assert_eq!("CLI".parse::<TransportKind>(), Ok(TransportKind::Cli));
        assert_eq!("http".parse::<TransportKind>(), Ok(TransportKind::Http));
        assert!("ftp".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_task_label_prefers_name() {
        let task: ResourceTask = serde_yaml::from_str(
            "kind: company\nidentity: { code: ACME }\nfields: { name: Acme }\n",
        )
        .expect("valid task");
        assert_eq!(task.label(), "company code=ACME");
        assert_eq!(task.state, DesiredState::Present);

        let named = ResourceTask {
            name: Some(String::from("main company")),
            ..task
        };
        assert_eq!(named.label(), "main company");
    }
}
