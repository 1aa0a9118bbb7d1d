//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use crate::config::{ConnectionConfig, TransportKind, ENV_PASSWORD};
use crate::error::Result;
use crate::operations::{DeletionType, ErasureStatus, Operation};
use crate::reconciler::DesiredState;
use crate::resource::{Record, ResourceDescriptor, ResourceKind, ID_KEY};
use crate::transport::Verbosity;

/// multiflexi-reconcile - Declarative, idempotent management of MultiFlexi resources.
#[derive(Parser, Debug)]
#[command(name = "multiflexi-reconcile")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the task file.
    #[arg(short, long, global = true, env = "MULTIFLEXI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Report what would change without changing anything.
    #[arg(long, global = true)]
    pub check: bool,

    /// Connection overrides.
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Connection settings given on the command line; they win over the task
/// file and the environment.
#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// Transport to use.
    #[arg(long, global = true)]
    pub transport: Option<TransportKind>,

    /// REST API base URL.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// API user.
    #[arg(long, global = true)]
    pub username: Option<String>,

    /// API password.
    #[arg(long, global = true, env = ENV_PASSWORD, hide_env_values = true)]
    pub password: Option<String>,

    /// Path to `multiflexi-cli`.
    #[arg(long, global = true)]
    pub cli_path: Option<String>,

    /// Request or command timeout in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

impl ConnectionArgs {
    /// Applies the given overrides to connection settings.
    pub fn apply(&self, connection: &mut ConnectionConfig) {
        if let Some(transport) = self.transport {
            connection.transport = transport;
        }
        if let Some(url) = &self.api_url {
            connection.api_url = Some(url.clone());
        }
        if let Some(username) = &self.username {
            connection.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            connection.password = Some(password.clone());
        }
        if let Some(cli_path) = &self.cli_path {
            connection.cli_path.clone_from(cli_path);
        }
        if let Some(timeout) = self.timeout {
            connection.timeout_secs = timeout;
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a starter task file.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the task file.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Apply every resource and operation in the task file.
    Apply {
        /// Continue on errors.
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Reconcile a single resource.
    Resource(ResourceArgs),

    /// Job queue operations.
    Queue {
        /// Queue subcommand.
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Encryption key operations.
    Encryption {
        /// Encryption subcommand.
        #[command(subcommand)]
        command: EncryptionCommands,
    },

    /// API token operations.
    Token {
        /// Token subcommand.
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// GDPR data erasure requests.
    Erasure {
        /// Erasure subcommand.
        #[command(subcommand)]
        command: ErasureCommands,
    },

    /// Job artifacts.
    Artifact {
        /// Artifact subcommand.
        #[command(subcommand)]
        command: ArtifactCommands,
    },

    /// Prune old jobs and logs.
    Prune {
        /// Prune logs.
        #[arg(long)]
        logs: bool,

        /// Prune jobs.
        #[arg(long)]
        jobs: bool,

        /// Records to keep.
        #[arg(long, default_value = "1000")]
        keep: u64,
    },

    /// Show MultiFlexi system status.
    Status,

    /// Show component versions and health.
    Appstatus,
}

/// Arguments of the `resource` command.
#[derive(Args, Debug)]
pub struct ResourceArgs {
    /// Resource kind.
    pub kind: ResourceKind,

    /// Desired state.
    #[arg(short, long, default_value = "present")]
    pub state: DesiredState,

    /// Record id.
    #[arg(long)]
    pub id: Option<u64>,

    /// Identity key, e.g. `--key code=ACME` (repeatable).
    #[arg(short, long = "key", value_parser = parse_assignment)]
    pub keys: Vec<(String, Value)>,

    /// Desired field value, e.g. `--set enabled=true` (repeatable).
    #[arg(long = "set", value_parser = parse_assignment)]
    pub fields: Vec<(String, Value)>,

    /// Field to exclude from change detection (repeatable).
    #[arg(long = "ignore")]
    pub ignored: Vec<String>,
}

impl ResourceArgs {
    /// Builds the descriptor for this invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if an identity key is unknown for the kind.
    pub fn descriptor(&self) -> Result<ResourceDescriptor> {
        let mut identity: Record = self.keys.iter().cloned().collect();
        if let Some(id) = self.id {
            identity.insert(ID_KEY.to_string(), Value::from(id));
        }
        let fields: Record = self.fields.iter().cloned().collect();

        ResourceDescriptor::from_parts(self.kind, &identity, &fields, &self.ignored)
    }
}

/// Job queue subcommands.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum QueueCommands {
    /// Show the queue.
    List,
    /// Empty the queue.
    Truncate,
}

/// Encryption subcommands.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum EncryptionCommands {
    /// Show key status.
    Status,
    /// Initialise keys.
    Init,
}

/// Token subcommands.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum TokenCommands {
    /// Generate a token for a user.
    Generate {
        /// Owner of the new token.
        #[arg(long)]
        user_id: u64,
    },
}

/// Artifact subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ArtifactCommands {
    /// List artifacts.
    List {
        /// Only artifacts of this job.
        #[arg(long)]
        job_id: Option<u64>,
        /// Comma-separated columns to return.
        #[arg(long)]
        fields: Option<String>,
    },
    /// Show one artifact.
    Get {
        /// Artifact id.
        #[arg(long)]
        id: u64,
        /// Comma-separated columns to return.
        #[arg(long)]
        fields: Option<String>,
    },
}

/// Erasure request subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ErasureCommands {
    /// List requests.
    List {
        /// Only requests in this status.
        #[arg(long)]
        status: Option<ErasureStatus>,
    },
    /// File a request.
    Create {
        /// Target user by id.
        #[arg(long, conflicts_with = "user_login", required_unless_present = "user_login")]
        user_id: Option<u64>,
        /// Target user by login.
        #[arg(long)]
        user_login: Option<String>,
        /// Soft or hard deletion.
        #[arg(long, default_value = "soft")]
        deletion_type: DeletionType,
        /// Reason recorded with the request.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Approve a request.
    Approve {
        /// Request to approve.
        #[arg(long)]
        request_id: u64,
        /// Reviewer notes.
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a request.
    Reject {
        /// Request to reject.
        #[arg(long)]
        request_id: u64,
        /// Reviewer notes.
        #[arg(long)]
        notes: Option<String>,
    },
    /// Carry out an approved request.
    Process {
        /// Request to process.
        #[arg(long)]
        request_id: u64,
        /// Process even if not approved.
        #[arg(long)]
        force: bool,
    },
    /// Show the audit trail of a request.
    Audit {
        /// Request to audit.
        #[arg(long)]
        request_id: u64,
        /// Also write the trail to this file.
        #[arg(long)]
        export_audit: Option<String>,
    },
    /// Remove completed requests.
    Cleanup,
}

impl Commands {
    /// Returns the imperative operation this command maps to, if any.
    #[must_use]
    pub fn operation(&self) -> Option<Operation> {
        let operation = match self {
            Self::Queue { command } => match command {
                QueueCommands::List => Operation::QueueList,
                QueueCommands::Truncate => Operation::QueueTruncate,
            },
            Self::Encryption { command } => match command {
                EncryptionCommands::Status => Operation::EncryptionStatus,
                EncryptionCommands::Init => Operation::EncryptionInit,
            },
            Self::Token {
                command: TokenCommands::Generate { user_id },
            } => Operation::TokenGenerate {
                user_id: Some(*user_id),
            },
            Self::Erasure { command } => command.operation(),
            Self::Artifact { command } => match command.clone() {
                ArtifactCommands::List { job_id, fields } => {
                    Operation::ArtifactList { job_id, fields }
                }
                ArtifactCommands::Get { id, fields } => Operation::ArtifactGet {
                    id: Some(id),
                    fields,
                },
            },
            Self::Prune { logs, jobs, keep } => Operation::Prune {
                logs: *logs,
                jobs: *jobs,
                keep: *keep,
            },
            Self::Status => Operation::SystemStatus,
            Self::Appstatus => Operation::AppStatus,
            Self::Init { .. } | Self::Validate { .. } | Self::Apply { .. } | Self::Resource(_) => {
                return None;
            }
        };
        Some(operation)
    }
}

impl ErasureCommands {
    fn operation(&self) -> Operation {
        match self.clone() {
            Self::List { status } => Operation::ErasureList { status },
            Self::Create {
                user_id,
                user_login,
                deletion_type,
                reason,
            } => Operation::ErasureCreate {
                user_id,
                user_login,
                deletion_type,
                reason,
            },
            Self::Approve { request_id, notes } => Operation::ErasureApprove {
                request_id: Some(request_id),
                notes,
            },
            Self::Reject { request_id, notes } => Operation::ErasureReject {
                request_id: Some(request_id),
                notes,
            },
            Self::Process { request_id, force } => Operation::ErasureProcess {
                request_id: Some(request_id),
                force,
            },
            Self::Audit {
                request_id,
                export_audit,
            } => Operation::ErasureAudit {
                request_id: Some(request_id),
                export_audit,
            },
            Self::Cleanup => Operation::ErasureCleanup,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the verbosity selected by `-v`/`-q`.
    #[must_use]
    pub const fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::from_count(self.verbose)
        }
    }
}

/// Parses `name=value`. The value is read as JSON when it parses as JSON and
/// kept as a plain string otherwise, so `enabled=true` is a boolean and
/// `name=Acme` a string.
///
/// # Errors
///
/// Returns an error if there is no `=` or the name is empty.
pub fn parse_assignment(s: &str) -> std::result::Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{s}'"));
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}
