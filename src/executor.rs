//! Task executor for applying whole task files.
//!
//! Resource tasks run first, in file order, followed by operations. Each task
//! is independent; a failure stops the run unless `continue_on_error` is set,
//! in which case the remaining tasks still run and the failure is reported.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{MultiflexiConfig, ResourceTask};
use crate::operations::{Operation, OperationRunner};
use crate::reconciler::Reconciler;
use crate::transport::Transport;

/// Executor for task files.
pub struct TaskExecutor<'a, T: Transport + ?Sized> {
    /// Backend access.
    transport: &'a T,
    /// Predict without mutating.
    check_mode: bool,
    /// Whether to continue on errors.
    continue_on_error: bool,
}

/// Result of a single task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// Position in the run.
    pub index: usize,
    /// Task label.
    pub label: String,
    /// Whether the task succeeded.
    pub success: bool,
    /// Whether the task changed (or would change) backend state.
    pub changed: bool,
    /// Whether the task was skipped after an earlier failure.
    pub skipped: bool,
    /// Result envelope of a successful task.
    pub result: Option<Value>,
    /// Error message (if failed).
    pub error: Option<String>,
    /// Backend return code (if failed and known).
    pub return_code: Option<i32>,
}

/// Result of executing a whole task file.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Individual task results.
    pub results: Vec<TaskResult>,
    /// Total tasks executed.
    pub total_executed: usize,
    /// Number of tasks that changed something.
    pub changed: usize,
    /// Number of tasks that changed nothing.
    pub unchanged: usize,
    /// Number of failed tasks.
    pub failed: usize,
    /// Number of skipped tasks.
    pub skipped: usize,
    /// Whether every task succeeded.
    pub success: bool,
    /// Whether the run was in check mode.
    pub check_mode: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Returns the return code of the first failed task, if any.
    #[must_use]
    pub fn first_return_code(&self) -> Option<i32> {
        self.results
            .iter()
            .find(|r| !r.success && !r.skipped)
            .and_then(|r| r.return_code)
    }

    /// Returns the wall-clock duration of the run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

enum Task<'c> {
    Resource(&'c ResourceTask),
    Operation(&'c Operation),
}

impl Task<'_> {
    fn label(&self) -> String {
        match self {
            Self::Resource(task) => task.label(),
            Self::Operation(operation) => operation.name().to_string(),
        }
    }
}

impl<'a, T: Transport + ?Sized> TaskExecutor<'a, T> {
    /// Creates a new task executor.
    #[must_use]
    pub const fn new(transport: &'a T) -> Self {
        Self {
            transport,
            check_mode: false,
            continue_on_error: false,
        }
    }

    /// Enables or disables check mode.
    #[must_use]
    pub const fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Executes every resource task and operation of a task file.
    pub async fn execute(&self, config: &MultiflexiConfig) -> ExecutionResult {
        let started_at = Utc::now();
        let tasks: Vec<Task<'_>> = config
            .resources
            .iter()
            .map(Task::Resource)
            .chain(config.operations.iter().map(Task::Operation))
            .collect();

        info!(
            "Executing {} task(s){}",
            tasks.len(),
            if self.check_mode { " in check mode" } else { "" }
        );

        let mut results = Vec::with_capacity(tasks.len());
        let mut aborted = false;

        for (index, task) in tasks.iter().enumerate() {
            let label = task.label();

            if aborted {
                warn!("Skipping {label} after earlier failure");
                results.push(TaskResult {
                    index,
                    label,
                    success: false,
                    changed: false,
                    skipped: true,
                    result: None,
                    error: Some(String::from("Skipped due to earlier failure")),
                    return_code: None,
                });
                continue;
            }

            let outcome = match task {
                Task::Resource(resource) => self.run_resource(resource).await,
                Task::Operation(operation) => self.run_operation(operation).await,
            };

            match outcome {
                Ok((changed, envelope)) => {
                    info!("{label}: {}", if changed { "changed" } else { "ok" });
                    results.push(TaskResult {
                        index,
                        label,
                        success: true,
                        changed,
                        skipped: false,
                        result: Some(envelope),
                        error: None,
                        return_code: None,
                    });
                }
                Err(e) => {
                    error!("{label} failed: {e}");
                    results.push(TaskResult {
                        index,
                        label,
                        success: false,
                        changed: false,
                        skipped: false,
                        result: None,
                        error: Some(e.to_string()),
                        return_code: e.return_code(),
                    });
                    if !self.continue_on_error {
                        aborted = true;
                    }
                }
            }
        }

        let skipped = results.iter().filter(|r| r.skipped).count();
        let failed = results.iter().filter(|r| !r.success && !r.skipped).count();
        let changed = results.iter().filter(|r| r.changed).count();
        let total_executed = results.len() - skipped;

        ExecutionResult {
            total_executed,
            changed,
            unchanged: total_executed - changed - failed,
            failed,
            skipped,
            success: failed == 0,
            check_mode: self.check_mode,
            results,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run_resource(&self, task: &ResourceTask) -> crate::error::Result<(bool, Value)> {
        let descriptor = task.descriptor()?;
        let outcome = Reconciler::new(self.transport)
            .with_check_mode(self.check_mode)
            .reconcile(&descriptor, task.state)
            .await?;
        Ok((outcome.changed, outcome.to_envelope()))
    }

    async fn run_operation(&self, operation: &Operation) -> crate::error::Result<(bool, Value)> {
        let outcome = OperationRunner::new(self.transport)
            .with_check_mode(self.check_mode)
            .run(operation)
            .await?;
        Ok((outcome.changed, outcome.to_envelope()))
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Run {status}:")?;
        writeln!(f, "  Changed: {}", self.changed)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;
        writeln!(f, "  Failed: {}", self.failed)?;
        writeln!(f, "  Skipped: {}", self.skipped)?;

        let errors: Vec<&TaskResult> = self
            .results
            .iter()
            .filter(|r| !r.success && !r.skipped)
            .collect();
        if !errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for result in errors {
                writeln!(
                    f,
                    "    - {}: {}",
                    result.label,
                    result.error.as_deref().unwrap_or("unknown error")
                )?;
            }
        }

        Ok(())
    }
}
