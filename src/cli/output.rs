//! Output formatting for CLI commands.
//!
//! Text output is meant for people; JSON output prints the result envelope
//! (`{ changed, <kind>: ..., msg }`) so the tool can be scripted.

use colored::Colorize;
use serde_json::{json, Value};
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::error::MultiflexiError;
use crate::executor::{ExecutionResult, TaskResult};
use crate::operations::OperationOutcome;
use crate::reconciler::{Payload, ReconcileAction, ReconcileOutcome};
use crate::resource::{render_scalar, Record, ID_KEY};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Field change row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Desired")]
    desired: String,
}

/// Record field row for table display.
#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Listed record row for table display.
#[derive(Tabled)]
struct ListRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
}

/// Task row for table display.
#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Result")]
    result: String,
}

/// Keys tried, in order, to name a listed record.
const NAME_KEYS: &[&str] = &["name", "login", "code", "email", "uuid"];

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a reconciliation outcome.
    #[must_use]
    pub fn format_outcome(&self, outcome: &ReconcileOutcome) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&outcome.to_envelope()).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_outcome_text(outcome),
        }
    }

    /// Formats an outcome as text.
    fn format_outcome_text(outcome: &ReconcileOutcome) -> String {
        let mut output = String::new();

        let marker = if outcome.changed {
            "~".yellow().to_string()
        } else {
            "✓".green().to_string()
        };
        let prefix = if outcome.check_mode && outcome.changed {
            "[check] "
        } else {
            ""
        };
        let _ = writeln!(
            output,
            "{marker} {prefix}{}: {}",
            outcome.target,
            Self::format_action(outcome.action)
        );
        if let Some(message) = &outcome.message {
            let _ = writeln!(output, "   {message}");
        }

        if !outcome.changes.is_empty() {
            let rows: Vec<ChangeRow> = outcome
                .changes
                .iter()
                .map(|c| ChangeRow {
                    field: c.field.clone(),
                    current: c
                        .old_value
                        .as_ref()
                        .map_or_else(|| String::from("-"), |v| Self::truncate(&render_scalar(v), 40)),
                    desired: Self::truncate(&render_scalar(&c.new_value), 40),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        match &outcome.payload {
            Payload::Record(record) => {
                output.push('\n');
                output.push_str(&Self::record_table(record));
                output.push('\n');
            }
            Payload::List(records) if records.is_empty() => {
                output.push_str("   No records.\n");
            }
            Payload::List(records) => {
                let rows: Vec<ListRow> = records
                    .iter()
                    .map(|r| ListRow {
                        id: r.get(ID_KEY).map(render_scalar).unwrap_or_default(),
                        name: NAME_KEYS
                            .iter()
                            .find_map(|k| r.get(*k).filter(|v| !v.is_null()))
                            .map(|v| Self::truncate(&render_scalar(v), 40))
                            .unwrap_or_default(),
                    })
                    .collect();
                output.push('\n');
                output.push_str(&Table::new(rows).to_string());
                let _ = write!(output, "\n\n{} record(s)\n", records.len());
            }
            Payload::None => {}
        }

        output
    }

    /// Formats the result of an imperative operation.
    #[must_use]
    pub fn format_operation(&self, outcome: &OperationOutcome) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&outcome.to_envelope()).unwrap_or_default()
            }
            OutputFormat::Text => {
                let marker = if outcome.changed {
                    "~".yellow().to_string()
                } else {
                    "✓".green().to_string()
                };
                let mut output = format!("{marker} {outcome}\n");

                match &outcome.payload {
                    Value::Null => {}
                    Value::Object(record) => {
                        output.push('\n');
                        output.push_str(&Self::record_table(record));
                        output.push('\n');
                    }
                    Value::String(text) => {
                        let _ = writeln!(output, "\n{}", text.trim_end());
                    }
                    other => {
                        let _ = writeln!(
                            output,
                            "\n{}",
                            serde_json::to_string_pretty(other).unwrap_or_default()
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the result of applying a task file.
    #[must_use]
    pub fn format_execution(&self, result: &ExecutionResult) -> String {
        match self.format {
            OutputFormat::Json => {
                let envelope = json!({
                    "changed": result.changed > 0,
                    "failed": !result.success,
                    "check_mode": result.check_mode,
                    "summary": {
                        "total": result.total_executed,
                        "changed": result.changed,
                        "unchanged": result.unchanged,
                        "failed": result.failed,
                        "skipped": result.skipped,
                        "duration_ms": result.duration_ms(),
                    },
                    "results": result.results,
                });
                serde_json::to_string_pretty(&envelope).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();

                if result.results.is_empty() {
                    let _ = writeln!(output, "{} Nothing to do.", "✓".green());
                    return output;
                }

                let rows: Vec<TaskRow> = result
                    .results
                    .iter()
                    .map(|r| TaskRow {
                        index: r.index + 1,
                        task: Self::truncate(&r.label, 50),
                        result: Self::format_task_result(r),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push_str("\n\n");

                let status = if result.success {
                    format!("{} Apply successful", "✓".green())
                } else {
                    format!("{} Apply failed", "✗".red())
                };
                let mode = if result.check_mode { " (check mode)" } else { "" };
                let _ = writeln!(output, "{status}{mode}");
                let _ = writeln!(output, "   Changed: {}", result.changed);
                let _ = writeln!(output, "   Unchanged: {}", result.unchanged);
                let _ = writeln!(output, "   Failed: {}", result.failed);
                let _ = writeln!(output, "   Skipped: {}", result.skipped);

                let errors: Vec<&TaskResult> = result
                    .results
                    .iter()
                    .filter(|r| !r.success && !r.skipped)
                    .collect();
                if !errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for task in errors {
                        let _ = writeln!(
                            output,
                            "   - {}: {}",
                            task.label,
                            task.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let errors: Vec<Value> = result
                    .errors
                    .iter()
                    .map(|e| json!({ "field": e.field, "message": e.message }))
                    .collect();
                let envelope = json!({
                    "valid": result.is_valid(),
                    "errors": errors,
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&envelope).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();

                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid.", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Configuration has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                    }
                }

                if result.warning_count() > 0 {
                    if show_warnings {
                        let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                        for warning in &result.warnings {
                            let _ = writeln!(output, "   - {warning}");
                        }
                    } else {
                        let _ = writeln!(
                            output,
                            "   {} warning(s), use --warnings to show them",
                            result.warning_count()
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a fatal error. The JSON form is the failure envelope
    /// `{ failed: true, msg, rc? }`.
    #[must_use]
    pub fn format_error(&self, error: &MultiflexiError) -> String {
        match self.format {
            OutputFormat::Json => {
                let mut envelope = Record::new();
                envelope.insert(String::from("failed"), Value::Bool(true));
                envelope.insert(String::from("msg"), Value::String(error.to_string()));
                if let Some(rc) = error.return_code() {
                    envelope.insert(String::from("rc"), Value::from(rc));
                }
                serde_json::to_string_pretty(&Value::Object(envelope)).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} Error: {error}\n", "✗".red()),
        }
    }

    /// Formats a short confirmation message.
    #[must_use]
    pub fn format_message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&json!({ "changed": true, "msg": message }))
                    .unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}\n", "✓".green()),
        }
    }

    /// Renders a record as a two-column table.
    fn record_table(record: &Record) -> String {
        let rows: Vec<FieldRow> = record
            .iter()
            .map(|(field, value)| FieldRow {
                field: field.clone(),
                value: Self::truncate(&render_scalar(value), 60),
            })
            .collect();
        Table::new(rows).to_string()
    }

    /// Formats an action with color.
    fn format_action(action: ReconcileAction) -> String {
        let text = action.to_string();
        match action {
            ReconcileAction::Created => text.green().to_string(),
            ReconcileAction::Updated => text.yellow().to_string(),
            ReconcileAction::Removed => text.red().to_string(),
            ReconcileAction::Unchanged | ReconcileAction::Read => text.dimmed().to_string(),
            ReconcileAction::Unsupported => text.magenta().to_string(),
        }
    }

    /// Formats a task result with color.
    fn format_task_result(task: &TaskResult) -> String {
        if task.skipped {
            "skipped".dimmed().to_string()
        } else if !task.success {
            "failed".red().to_string()
        } else if task.changed {
            "changed".yellow().to_string()
        } else {
            "ok".green().to_string()
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::resource::{FieldChange, ResourceKind};
    use crate::reconciler::DesiredState;

    fn outcome() -> ReconcileOutcome {
        ReconcileOutcome {
            kind: ResourceKind::Company,
            target: String::from("company code=ACME"),
            state: DesiredState::Present,
            changed: true,
            action: ReconcileAction::Updated,
            changes: vec![FieldChange {
                field: String::from("name"),
                old_value: Some(json!("Old")),
                new_value: json!("Acme"),
            }],
            payload: Payload::Record(
                json!({ "id": 3, "code": "ACME", "name": "Acme" })
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            ),
            message: None,
            check_mode: false,
        }
    }

    #[test]
    fn test_outcome_json_is_envelope() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let parsed: Value =
            serde_json::from_str(&formatter.format_outcome(&outcome())).expect("json");

        assert_eq!(parsed["changed"], json!(true));
        assert_eq!(parsed["company"]["id"], json!(3));
        assert!(parsed.get("msg").is_none());
    }

    #[test]
    fn test_outcome_text_lists_changes() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_outcome(&outcome());

        assert!(text.contains("company code=ACME: updated"));
        assert!(text.contains("Old"));
        assert!(text.contains("Acme"));
    }

    #[test]
    fn test_error_envelope_carries_return_code() {
        let err: MultiflexiError =
            BackendError::command_failed("multiflexi-cli queue truncate", Some(3), "locked").into();
        let parsed: Value = serde_json::from_str(
            &OutputFormatter::new(OutputFormat::Json).format_error(&err),
        )
        .expect("json");

        assert_eq!(parsed["failed"], json!(true));
        assert_eq!(parsed["rc"], json!(3));
        assert!(parsed["msg"].as_str().is_some_and(|m| m.contains("locked")));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("Žluťoučký kůň", 8), "Žluťo...");
    }
}
