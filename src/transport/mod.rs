//! Transports to the MultiFlexi backend.
//!
//! The reconciler talks to MultiFlexi through the [`Transport`] trait. Two
//! implementations exist and one is chosen from configuration at startup:
//! - [`HttpTransport`]: the REST API, authenticated with HTTP basic auth
//! - [`ProcessTransport`]: the `multiflexi-cli` tool, invoked with `--format json`
//!
//! Both map their backend-specific "not found" signalling onto
//! [`Lookup::NotFound`] and every other failure onto a
//! [`crate::error::BackendError`] carrying the backend's message.

mod http;
mod process;

pub use http::HttpTransport;
pub use process::ProcessTransport;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{ConnectionConfig, TransportKind};
use crate::error::{BackendError, ConfigError, Result};
use crate::resource::{IdentityKey, Record, ResourceKind};

/// Outcome of looking a record up by one identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The backend returned a record.
    Found(Record),
    /// The backend reported that no such record exists.
    NotFound,
}

impl Lookup {
    /// Returns the record, if one was found.
    #[must_use]
    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Found(record) => Some(record),
            Self::NotFound => None,
        }
    }
}

/// Mutating verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Create a new record.
    Create,
    /// Update fields of an existing record.
    Update,
    /// Remove an existing record.
    Remove,
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Remove => "remove",
        };
        write!(f, "{s}")
    }
}

/// A create, update or remove call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Verb to perform.
    pub verb: Verb,
    /// Identifier of the target record (`None` for create).
    pub target: Option<Value>,
    /// Fields to send.
    pub fields: Record,
}

impl MutationRequest {
    /// Builds a create request.
    #[must_use]
    pub const fn create(kind: ResourceKind, fields: Record) -> Self {
        Self {
            kind,
            verb: Verb::Create,
            target: None,
            fields,
        }
    }

    /// Builds an update request for the record with the given identifier.
    #[must_use]
    pub const fn update(kind: ResourceKind, id: Value, fields: Record) -> Self {
        Self {
            kind,
            verb: Verb::Update,
            target: Some(id),
            fields,
        }
    }

    /// Builds a remove request for the record with the given identifier.
    #[must_use]
    pub fn remove(kind: ResourceKind, id: Value) -> Self {
        Self {
            kind,
            verb: Verb::Remove,
            target: Some(id),
            fields: Record::new(),
        }
    }
}

/// An imperative `multiflexi-cli` command that is not a record mutation,
/// e.g. `queue truncate` or `user:data-erasure approve --request-id 3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Command words.
    pub command: Vec<String>,
    /// Flags without the leading dashes; `None` values are bare switches.
    pub flags: Vec<(String, Option<String>)>,
}

impl Invocation {
    /// Starts an invocation of the given command words.
    #[must_use]
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            flags: Vec::new(),
        }
    }

    /// Adds a flag with a value.
    #[must_use]
    pub fn flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.push((name.into(), Some(value.into())));
        self
    }

    /// Adds a flag with a value when one is present.
    #[must_use]
    pub fn flag_opt(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.flag(name, v),
            None => self,
        }
    }

    /// Adds a bare switch when `enabled` is true.
    #[must_use]
    pub fn switch(mut self, name: impl Into<String>, enabled: bool) -> Self {
        if enabled {
            self.flags.push((name.into(), None));
        }
        self
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command.join(" "))?;
        for (name, value) in &self.flags {
            match value {
                Some(v) => write!(f, " --{name} {v}")?,
                None => write!(f, " --{name}")?,
            }
        }
        Ok(())
    }
}

/// Diagnostics level handed to a transport when it is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Normal progress messages.
    #[default]
    Normal,
    /// Requests and command lines.
    Debug,
    /// Requests, command lines and raw payloads.
    Trace,
}

impl Verbosity {
    /// Maps a `-v` repetition count to a verbosity.
    #[must_use]
    pub const fn from_count(count: u8) -> Self {
        match count {
            0 => Self::Normal,
            1 => Self::Debug,
            _ => Self::Trace,
        }
    }

    /// Returns the `tracing` filter directive for this level.
    #[must_use]
    pub const fn filter_directive(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Returns true if raw request and response payloads should be logged.
    #[must_use]
    pub const fn logs_payloads(self) -> bool {
        matches!(self, Self::Trace)
    }

    /// Returns true if requests and command lines should be logged.
    #[must_use]
    pub const fn logs_requests(self) -> bool {
        matches!(self, Self::Debug | Self::Trace)
    }
}

/// Access to the MultiFlexi backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Looks a record up by one identity key.
    async fn lookup(&self, kind: ResourceKind, key: &IdentityKey) -> Result<Lookup>;

    /// Lists every record of a kind.
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Record>>;

    /// Performs a create, update or remove call and returns the raw response.
    async fn mutate(&self, request: &MutationRequest) -> Result<Value>;

    /// Runs an imperative command and returns its JSON output.
    async fn invoke(&self, invocation: &Invocation) -> Result<Value>;

    /// Gets the transport name.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn lookup(&self, kind: ResourceKind, key: &IdentityKey) -> Result<Lookup> {
        (**self).lookup(kind, key).await
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<Record>> {
        (**self).list(kind).await
    }

    async fn mutate(&self, request: &MutationRequest) -> Result<Value> {
        (**self).mutate(request).await
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<Value> {
        (**self).invoke(invocation).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Builds the transport selected by the connection settings.
///
/// # Errors
///
/// Returns an error if a setting the transport needs is missing or the HTTP
/// client cannot be created.
pub fn connect(connection: &ConnectionConfig, verbosity: Verbosity) -> Result<Box<dyn Transport>> {
    match connection.transport {
        TransportKind::Http => {
            let api_url = required(connection.api_url.as_deref(), "api_url", "http")?;
            let username = required(connection.username.as_deref(), "username", "http")?;
            let password = required(connection.password.as_deref(), "password", "http")?;
            let transport = HttpTransport::new(api_url, username, password, verbosity)?
                .with_timeout(connection.timeout_secs)?;
            Ok(Box::new(transport))
        }
        TransportKind::Cli => {
            let transport = ProcessTransport::new(&connection.cli_path, verbosity)
                .with_timeout(connection.timeout_secs);
            Ok(Box::new(transport))
        }
    }
}

fn required<'a>(value: Option<&'a str>, setting: &str, transport: &str) -> Result<&'a str> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        ConfigError::MissingConnectionSetting {
            setting: setting.to_string(),
            transport: transport.to_string(),
        }
        .into()
    })
}

/// Returns true if a JSON payload is the backend's "not found" marker.
pub(crate) fn is_not_found_marker(value: &Value) -> bool {
    value
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| {
            let s = s.trim().to_ascii_lowercase();
            s == "not found" || s == "not_found" || s == "notfound"
        })
}

/// Interprets a lookup response body.
///
/// `null`, `{}`, `[]` and the "not found" marker mean absence; an object (or
/// a one-element list wrapping an object) is the record.
pub(crate) fn interpret_lookup(value: Value) -> Result<Lookup> {
    if is_not_found_marker(&value) {
        return Ok(Lookup::NotFound);
    }

    match value {
        Value::Null => Ok(Lookup::NotFound),
        Value::Object(map) if map.is_empty() => Ok(Lookup::NotFound),
        Value::Object(map) => Ok(Lookup::Found(map)),
        Value::Array(items) => match items.into_iter().next() {
            None => Ok(Lookup::NotFound),
            Some(Value::Object(map)) => Ok(Lookup::Found(map)),
            Some(other) => Err(BackendError::invalid_response(format!(
                "expected a record, got {other}"
            ))
            .into()),
        },
        other => Err(BackendError::invalid_response(format!("expected a record, got {other}")).into()),
    }
}

/// Interprets a list response body.
///
/// Accepts a bare list of records or an object wrapping exactly one list.
pub(crate) fn interpret_list(value: Value) -> Result<Vec<Record>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut lists = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (lists.next(), lists.next()) {
                (Some(items), None) => items,
                _ => {
                    return Err(BackendError::invalid_response(
                        "expected a list of records",
                    )
                    .into());
                }
            }
        }
        other => {
            return Err(
                BackendError::invalid_response(format!("expected a list, got {other}")).into(),
            );
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(BackendError::invalid_response(format!(
                "expected a record in list, got {other}"
            ))
            .into()),
        })
        .collect()
}

/// Parses a raw body as JSON, treating an empty body as `null`.
pub(crate) fn parse_body(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| {
        BackendError::invalid_response(format!("malformed JSON ({e}): {}", body.trim())).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_found_marker() {
        assert!(is_not_found_marker(&json!({ "status": "not found" })));
        assert!(is_not_found_marker(&json!({ "status": "Not Found", "id": 3 })));
        assert!(!is_not_found_marker(&json!({ "status": "active" })));
    }

    #[test]
    fn test_interpret_lookup_variants() {
        assert_eq!(interpret_lookup(Value::Null).ok(), Some(Lookup::NotFound));
        assert_eq!(interpret_lookup(json!([])).ok(), Some(Lookup::NotFound));
        assert_eq!(interpret_lookup(json!({})).ok(), Some(Lookup::NotFound));

        let found = interpret_lookup(json!([{ "id": 1 }])).expect("record");
        assert!(matches!(found, Lookup::Found(ref r) if r.get("id") == Some(&json!(1))));

        assert!(interpret_lookup(json!("oops")).is_err());
    }

    #[test]
    fn test_interpret_list_unwraps_single_collection() {
        let records = interpret_list(json!({ "apps": [{ "id": 1 }, { "id": 2 }] })).expect("list");
        assert_eq!(records.len(), 2);

        assert!(interpret_list(json!({ "a": [], "b": [] })).is_err());
        assert!(interpret_list(json!([1, 2])).is_err());
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body("  ").ok(), Some(Value::Null));
        assert!(parse_body("<html>").is_err());
    }

    #[test]
    fn test_invocation_display() {
        let invocation = Invocation::new(["user:data-erasure", "process"])
            .flag("request-id", "4")
            .switch("force", true)
            .switch("dry", false);
        assert_eq!(
            invocation.to_string(),
            "user:data-erasure process --request-id 4 --force"
        );
    }

    #[test]
    fn test_verbosity_from_count() {
        assert_eq!(Verbosity::from_count(0), Verbosity::Normal);
        assert_eq!(Verbosity::from_count(1), Verbosity::Debug);
        assert_eq!(Verbosity::from_count(5), Verbosity::Trace);
        assert!(Verbosity::Trace.logs_payloads());
        assert!(!Verbosity::Debug.logs_payloads());
    }
}
