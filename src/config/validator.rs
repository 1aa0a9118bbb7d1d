//! Configuration validation for task files.
//!
//! Every problem is collected before anything is sent to the backend, so a
//! broken task file fails fast without leaving half of its tasks applied.

use crate::error::{ConfigError, MultiflexiError, Result};
use crate::reconciler::DesiredState;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{ConnectionConfig, MultiflexiConfig, ResourceTask, TransportKind};

/// Validator for task files.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Skip connection checks (for files that only describe resources).
    skip_connection: bool,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            skip_connection: false,
        }
    }

    /// Skips the connection section.
    #[must_use]
    pub const fn without_connection(mut self) -> Self {
        self.skip_connection = true;
        self
    }

    /// Validates a task file.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &MultiflexiConfig) -> Result<ValidationResult> {
        let result = self.collect(config);

        if result.errors.is_empty() {
            debug!(
                "Configuration validation passed with {} warning(s)",
                result.warnings.len()
            );
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(MultiflexiError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn collect(&self, config: &MultiflexiConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !self.skip_connection {
            Self::validate_connection(&config.connection, &mut result);
        }
        Self::validate_resources(&config.resources, &mut result);
        Self::validate_operations(config, &mut result);

        result
    }

    fn validate_connection(connection: &ConnectionConfig, result: &mut ValidationResult) {
        match connection.transport {
            TransportKind::Http => {
                match connection.api_url.as_deref() {
                    None | Some("") => result.errors.push(ValidationError {
                        field: String::from("connection.api_url"),
                        message: String::from("API URL is required when using the http transport"),
                    }),
                    Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                        result.errors.push(ValidationError {
                            field: String::from("connection.api_url"),
                            message: format!("API URL '{url}' must start with http:// or https://"),
                        });
                    }
                    Some(url) if url.starts_with("http://") => {
                        result
                            .warnings
                            .push(format!("API URL '{url}' sends credentials unencrypted"));
                    }
                    Some(_) => {}
                }

                for (field, value) in [
                    ("connection.username", &connection.username),
                    ("connection.password", &connection.password),
                ] {
                    if value.as_deref().is_none_or(str::is_empty) {
                        result.errors.push(ValidationError {
                            field: field.to_string(),
                            message: format!(
                                "{} is required when using the http transport",
                                field.trim_start_matches("connection.")
                            ),
                        });
                    }
                }
            }
            TransportKind::Cli => {
                if connection.cli_path.trim().is_empty() {
                    result.errors.push(ValidationError {
                        field: String::from("connection.cli_path"),
                        message: String::from("CLI path cannot be empty"),
                    });
                }
                if connection.api_url.is_some() {
                    result
                        .warnings
                        .push(String::from("connection.api_url is ignored by the cli transport"));
                }
            }
        }

        if connection.timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("connection.timeout_secs"),
                message: String::from("Timeout must be greater than zero"),
            });
        }
    }

    fn validate_resources(tasks: &[ResourceTask], result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, task) in tasks.iter().enumerate() {
            let prefix = format!("resources[{i}]");
            let kind = task.kind;
            let capabilities = kind.profile().capabilities;

            if !kind.is_reconcilable() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.kind"),
                    message: format!(
                        "{kind} is not a reconcilable resource; list it under operations instead"
                    ),
                });
                continue;
            }

            let descriptor = match task.descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    result.errors.push(ValidationError {
                        field: format!("{prefix}.identity"),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            match task.state {
                DesiredState::Absent => {
                    if !descriptor.has_identity() {
                        result.errors.push(ValidationError {
                            field: format!("{prefix}.identity"),
                            message: format!("Removing {kind} requires an identity key"),
                        });
                    }
                    if !capabilities.remove {
                        result.warnings.push(format!(
                            "{prefix}: {kind} cannot be removed, the task will report 'Delete not implemented'"
                        ));
                    }
                }
                DesiredState::Present => {
                    if descriptor.desired_fields().is_empty() {
                        result.errors.push(ValidationError {
                            field: format!("{prefix}.fields"),
                            message: format!("No fields to manage for {kind}"),
                        });
                    }
                    if !descriptor.has_identity() {
                        if capabilities.create {
                            if let Some(field) = descriptor.missing_create_field() {
                                result.errors.push(ValidationError {
                                    field: format!("{prefix}.fields.{field}"),
                                    message: format!("Field '{field}' is required to create {kind}"),
                                });
                            }
                        } else {
                            result.warnings.push(format!(
                                "{prefix}: {kind} has no identity and cannot be created"
                            ));
                        }
                    }
                }
                DesiredState::Get => {
                    if !task.fields.is_empty() {
                        result
                            .warnings
                            .push(format!("{prefix}: fields are ignored with state 'get'"));
                    }
                }
            }

            if descriptor.has_identity() && !seen.insert(descriptor.label()) {
                result.warnings.push(format!(
                    "{prefix}: {} is managed by more than one task",
                    descriptor.label()
                ));
            }
        }
    }

    fn validate_operations(config: &MultiflexiConfig, result: &mut ValidationResult) {
        for (i, operation) in config.operations.iter().enumerate() {
            if let Err(e) = operation.validate() {
                result.errors.push(ValidationError {
                    field: format!("operations[{i}]"),
                    message: e.to_string(),
                });
            }
        }

        if !config.operations.is_empty() && config.connection.transport == TransportKind::Http {
            result.warnings.push(String::from(
                "operations need the cli transport and will fail over http",
            ));
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> MultiflexiConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml")
    }

    #[test]
    fn test_valid_cli_config() {
        let config = parse(
            r"
connection:
  transport: cli
resources:
  - kind: company
    identity: { code: ACME }
    fields: { name: Acme }
operations:
  - op: queue_list
",
        );
        let result = ConfigValidator::new().validate(&config).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_http_requires_credentials() {
        let config = parse("connection:\n  transport: http\n  api_url: https://mf.example.com/api\n");
        let result = ConfigValidator::new().collect(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["connection.username", "connection.password"]);
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = parse("connection:\n  transport: cli\n  timeout_secs: 0\n");
        let result = ConfigValidator::new().collect(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "connection.timeout_secs");
    }

    #[test]
    fn test_operations_only_kind_rejected_under_resources() {
        let config = parse("resources:\n  - kind: queue\n    state: get\n");
        let result = ConfigValidator::new().without_connection().collect(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "resources[0].kind");
    }

    #[test]
    fn test_absent_without_identity_rejected() {
        let config = parse("resources:\n  - kind: company\n    state: absent\n");
        let result = ConfigValidator::new().without_connection().collect(&config);
        assert_eq!(result.errors[0].field, "resources[0].identity");
    }

    #[test]
    fn test_create_requires_required_fields() {
        let config = parse("resources:\n  - kind: user\n    fields: { enabled: true }\n");
        let result = ConfigValidator::new().without_connection().collect(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "resources[0].fields.login");
    }

    #[test]
    fn test_company_app_requires_an_application() {
        let config = parse("resources:\n  - kind: company_app\n    fields: { company_id: 2 }\n");
        let result = ConfigValidator::new().without_connection().collect(&config);
        assert_eq!(result.error_count(), 1);
        assert!(result.errors[0].message.contains("'app_id or app_uuid'"));

        let config = parse(
            "resources:\n  - kind: company_app\n    fields: { company_id: 2, app_uuid: 6b3c }\n",
        );
        let result = ConfigValidator::new().without_connection().collect(&config);
        assert!(result.is_valid());
    }

    #[test]
    fn test_unknown_identity_key_rejected() {
        let config = parse(
            "resources:\n  - kind: user\n    identity: { code: X }\n    fields: { email: a@b.c }\n",
        );
        let result = ConfigValidator::new().without_connection().collect(&config);
        assert!(result.errors[0].message.contains("not an identity key"));
    }

    #[test]
    fn test_unsupported_remove_and_duplicates_warn() {
        let config = parse(
            r"
resources:
  - kind: topic
    state: absent
    identity: { name: billing }
  - kind: topic
    state: get
    identity: { name: billing }
",
        );
        let result = ConfigValidator::new().without_connection().collect(&config);
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 2);
    }

    #[test]
    fn test_invalid_operation_rejected() {
        let config = parse("operations:\n  - op: erasure_approve\n");
        let result = ConfigValidator::new().without_connection().collect(&config);
        assert_eq!(result.errors[0].field, "operations[0]");
    }
}
