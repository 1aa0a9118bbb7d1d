//! Error types for the MultiFlexi reconciler.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, parameter validation and the backend transports.
//! A remote "not found" answer is deliberately absent from this hierarchy; it is
//! modelled as [`crate::transport::Lookup::NotFound`].

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the MultiFlexi reconciler.
#[derive(Debug, Error)]
pub enum MultiflexiError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid or missing parameters for the requested operation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Errors reported by the remote backend or the transport reaching it.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A connection setting required by the selected transport is missing.
    #[error("Missing connection setting '{setting}' for {transport} transport")]
    MissingConnectionSetting {
        /// Name of the setting.
        setting: String,
        /// Transport that needs it.
        transport: String,
    },
}

/// Parameter validation errors, raised before any backend call is attempted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// No identity key was supplied where one is required.
    #[error("At least one identity key ({keys}) is required to manage {kind} with state '{state}'")]
    MissingIdentity {
        /// Resource kind.
        kind: String,
        /// Requested state.
        state: String,
        /// Identity keys accepted by the kind.
        keys: String,
    },

    /// A field required for the operation is missing.
    #[error("Field '{field}' is required to {operation} {kind}")]
    MissingField {
        /// Resource kind.
        kind: String,
        /// Operation being attempted.
        operation: String,
        /// Missing field.
        field: String,
    },

    /// An identity key name is not known for the kind.
    #[error("'{key}' is not an identity key of {kind} (expected one of: {expected})")]
    UnknownIdentityKey {
        /// Resource kind.
        kind: String,
        /// Offending key.
        key: String,
        /// Accepted keys.
        expected: String,
    },

    /// The kind cannot be managed through the reconciler.
    #[error("{kind} is not a reconcilable resource; use its dedicated operations instead")]
    NotReconcilable {
        /// Resource kind.
        kind: String,
    },

    /// No desired field was given for a `present` request.
    #[error("No fields to manage for {kind}")]
    NothingToManage {
        /// Resource kind.
        kind: String,
    },

    /// A parameter value is malformed.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        /// Parameter name.
        field: String,
        /// Description of the problem.
        message: String,
    },
}

/// Errors reported by the remote backend or the transport used to reach it.
///
/// Backend messages are carried verbatim so operators can diagnose remote-side
/// problems without re-running at a higher verbosity.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The API returned a non-success status.
    #[error("MultiFlexi API request failed ({status}): {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Authentication was rejected.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Rate limited by the API.
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network or connection error.
    #[error("Network error: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// The command-line tool could not be started.
    #[error("Failed to launch {program}: {message}")]
    SpawnFailed {
        /// Program that failed to start.
        program: String,
        /// OS error description.
        message: String,
    },

    /// The command-line tool exited unsuccessfully.
    #[error("multiflexi-cli error: {message}")]
    CommandFailed {
        /// Command line that was run.
        command: String,
        /// Process exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Standard error (or standard output when stderr was empty).
        message: String,
    },

    /// The backend answered with something that is not the expected JSON.
    #[error("Invalid response from backend: {message}")]
    InvalidResponse {
        /// Description of the problem.
        message: String,
    },

    /// The transport has no way to perform the request.
    #[error("{operation} is not supported by the {transport} transport")]
    Unsupported {
        /// Transport name.
        transport: String,
        /// Requested operation.
        operation: String,
    },
}

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, MultiflexiError>;

impl MultiflexiError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend(BackendError::RateLimited { .. } | BackendError::NetworkError { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Backend(BackendError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            Self::Backend(BackendError::NetworkError { .. }) => Some(1),
            _ => None,
        }
    }

    /// Returns the backend-supplied return code, if there is one.
    ///
    /// This is the exit code of `multiflexi-cli` or the HTTP status of the API.
    #[must_use]
    pub const fn return_code(&self) -> Option<i32> {
        match self {
            Self::Backend(BackendError::CommandFailed { exit_code, .. }) => *exit_code,
            Self::Backend(BackendError::ApiRequestFailed { status, .. }) => Some(*status as i32),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl BackendError {
    /// Creates an API error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Creates a command failure.
    #[must_use]
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_code_from_command_failure() {
        let err = MultiflexiError::from(BackendError::command_failed(
            "multiflexi-cli company get",
            Some(3),
            "database unavailable",
        ));
        assert_eq!(err.return_code(), Some(3));
        assert_eq!(err.to_string(), "multiflexi-cli error: database unavailable");
    }

    #[test]
    fn test_return_code_from_http_failure() {
        let err = MultiflexiError::from(BackendError::api_error(500, "boom"));
        assert_eq!(err.return_code(), Some(500));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(MultiflexiError::from(BackendError::network("reset")).is_retryable());
        assert!(!MultiflexiError::from(BackendError::api_error(400, "bad")).is_retryable());
        assert_eq!(
            MultiflexiError::from(BackendError::RateLimited { retry_after_secs: 7 })
                .retry_delay_secs(),
            Some(7)
        );
    }
}
