//! Reconciler for maintaining desired state.
//!
//! This module implements the single-resource reconciliation pass: resolve
//! the remote record through the kind's identity keys, decide between create,
//! update, remove or nothing, perform at most one mutating call and read the
//! record back so callers always see the backend's current view.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, ValidationError};
use crate::resource::{
    compute_diff, values_match, FieldChange, FieldDiff, IdentityKey, Record, ResourceDescriptor,
    ResourceKind, ID_KEY,
};
use crate::transport::{Lookup, MutationRequest, Transport};

/// Requested end state of a resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// The resource exists with the desired fields.
    #[default]
    Present,
    /// The resource does not exist.
    Absent,
    /// Read only.
    Get,
}

impl std::fmt::Display for DesiredState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Get => "get",
        };
        write!(f, "{s}")
    }
}

/// What a reconciliation pass did (or would do in check mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// A record was created.
    Created,
    /// Fields of an existing record were updated.
    Updated,
    /// A record was removed.
    Removed,
    /// Nothing needed to change.
    Unchanged,
    /// The record or collection was read.
    Read,
    /// The backend cannot perform the required verb for this kind.
    Unsupported,
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Unchanged => "unchanged",
            Self::Read => "read",
            Self::Unsupported => "unsupported",
        };
        write!(f, "{s}")
    }
}

/// Data returned under the kind's key in the result envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// A single record.
    Record(Record),
    /// A whole collection.
    List(Vec<Record>),
    /// Nothing to report.
    None,
}

impl Payload {
    /// Converts the payload into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Record(record) => Value::Object(record.clone()),
            Self::List(records) => {
                Value::Array(records.iter().cloned().map(Value::Object).collect())
            }
            Self::None => Value::Null,
        }
    }

    /// Returns the single record, if that is what the payload holds.
    #[must_use]
    pub const fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }
}

impl From<Option<Record>> for Payload {
    fn from(record: Option<Record>) -> Self {
        record.map_or(Self::None, Self::Record)
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Human-readable target, e.g. `company code=ACME`.
    pub target: String,
    /// Requested state.
    pub state: DesiredState,
    /// Whether the remote record changed (or would change in check mode).
    pub changed: bool,
    /// Action taken.
    pub action: ReconcileAction,
    /// Field changes that drove a create or update.
    pub changes: Vec<FieldChange>,
    /// Freshest known state of the resource.
    pub payload: Payload,
    /// Optional message.
    pub message: Option<String>,
    /// Whether the pass ran in check mode.
    pub check_mode: bool,
}

impl ReconcileOutcome {
    /// Builds the result envelope `{ changed, <kind>: payload, msg? }`.
    #[must_use]
    pub fn to_envelope(&self) -> Value {
        let mut envelope = Record::new();
        envelope.insert(String::from("changed"), Value::Bool(self.changed));
        envelope.insert(self.kind.as_str().to_string(), self.payload.to_value());
        if let Some(message) = &self.message {
            envelope.insert(String::from("msg"), Value::String(message.clone()));
        }
        Value::Object(envelope)
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.target, self.action)?;
        if !self.changes.is_empty() {
            let fields: Vec<&str> = self.changes.iter().map(|c| c.field.as_str()).collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        if let Some(message) = &self.message {
            write!(f, " - {message}")?;
        }
        Ok(())
    }
}

/// Reconciles single resources against the backend.
pub struct Reconciler<'a, T: Transport + ?Sized> {
    /// Backend access.
    transport: &'a T,
    /// Predict without mutating.
    check_mode: bool,
}

impl<'a, T: Transport + ?Sized> Reconciler<'a, T> {
    /// Creates a new reconciler.
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

    /// Returns true if running in check mode.
    #[must_use]
    pub const fn check_mode(&self) -> bool {
        self.check_mode
    }

    /// Drives one resource towards `state`.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any backend call when the request is
    /// incomplete, and the backend's error verbatim when a lookup or mutation
    /// fails.
    pub async fn reconcile(
        &self,
        descriptor: &ResourceDescriptor,
        state: DesiredState,
    ) -> Result<ReconcileOutcome> {
        Self::validate(descriptor, state)?;

        debug!("Reconciling {} to state '{state}'", descriptor.label());

        match state {
            DesiredState::Get => self.read(descriptor).await,
            DesiredState::Absent => {
                let current = self.resolve(descriptor).await?;
                self.ensure_absent(descriptor, current).await
            }
            DesiredState::Present => {
                let current = self.resolve(descriptor).await?;
                match current {
                    Some(record) => self.ensure_updated(descriptor, record).await,
                    None => self.ensure_created(descriptor).await,
                }
            }
        }
    }

    /// Finds the current record through the descriptor's identity keys.
    ///
    /// Keys are tried most specific first; the first record carrying an `id`
    /// wins.
    ///
    /// # Errors
    ///
    /// Returns any lookup failure other than "not found".
    pub async fn resolve(&self, descriptor: &ResourceDescriptor) -> Result<Option<Record>> {
        for key in descriptor.identity_keys() {
            if let Some(record) = self.lookup(descriptor.kind(), key).await? {
                return Ok(Some(record));
            }
        }

        if let Some(record) = self.match_existing(descriptor).await? {
            return Ok(Some(record));
        }

        debug!("{} not found", descriptor.label());
        Ok(None)
    }

    /// Searches the collection for a record whose match fields all equal the
    /// desired ones. Only kinds with match fields take part, and only when the
    /// descriptor carries enough of them to create the record.
    async fn match_existing(&self, descriptor: &ResourceDescriptor) -> Result<Option<Record>> {
        let kind = descriptor.kind();
        let profile = kind.profile();
        if profile.match_fields.is_empty() || descriptor.missing_create_field().is_some() {
            return Ok(None);
        }

        let criteria: Vec<(&str, &Value)> = profile
            .match_fields
            .iter()
            .filter_map(|field| {
                descriptor
                    .desired_fields()
                    .get(*field)
                    .map(|value| (*field, value))
            })
            .collect();

        debug!("Searching {kind} records by {}", profile.match_fields.join(", "));
        let found = self.transport.list(kind).await?.into_iter().find(|record| {
            record_id(record).is_some()
                && criteria.iter().all(|(field, desired)| {
                    record
                        .get(*field)
                        .is_some_and(|observed| values_match(profile, field, desired, observed))
                })
        });
        Ok(found)
    }

    async fn lookup(&self, kind: ResourceKind, key: &IdentityKey) -> Result<Option<Record>> {
        debug!("Looking up {kind} by {key}");
        match self.transport.lookup(kind, key).await? {
            Lookup::Found(record) if record_id(&record).is_some() => Ok(Some(record)),
            Lookup::Found(_) => {
                debug!("{kind} lookup by {key} returned a record without id");
                Ok(None)
            }
            Lookup::NotFound => Ok(None),
        }
    }

    fn validate(descriptor: &ResourceDescriptor, state: DesiredState) -> Result<()> {
        let kind = descriptor.kind();

        if !kind.is_reconcilable() {
            return Err(ValidationError::NotReconcilable {
                kind: kind.to_string(),
            }
            .into());
        }

        if state == DesiredState::Absent && !descriptor.has_identity() {
            return Err(ValidationError::MissingIdentity {
                kind: kind.to_string(),
                state: state.to_string(),
                keys: kind.profile().identity_keys.join(", "),
            }
            .into());
        }

        if state == DesiredState::Present && descriptor.desired_fields().is_empty() {
            return Err(ValidationError::NothingToManage {
                kind: kind.to_string(),
            }
            .into());
        }

        Ok(())
    }

    async fn read(&self, descriptor: &ResourceDescriptor) -> Result<ReconcileOutcome> {
        let payload = if descriptor.has_identity() {
            Payload::from(self.resolve(descriptor).await?)
        } else {
            debug!("No identity given, listing every {}", descriptor.kind());
            Payload::List(self.transport.list(descriptor.kind()).await?)
        };

        Ok(self.outcome(descriptor, DesiredState::Get, ReconcileAction::Read, payload))
    }

    async fn ensure_absent(
        &self,
        descriptor: &ResourceDescriptor,
        current: Option<Record>,
    ) -> Result<ReconcileOutcome> {
        let kind = descriptor.kind();
        let state = DesiredState::Absent;

        let Some(record) = current else {
            return Ok(self.outcome(descriptor, state, ReconcileAction::Unchanged, Payload::None));
        };

        if !kind.profile().capabilities.remove {
            return Ok(self
                .outcome(descriptor, state, ReconcileAction::Unsupported, Payload::Record(record))
                .with_message("Delete not implemented"));
        }

        let Some(id) = record_id(&record) else {
            return Ok(self.outcome(descriptor, state, ReconcileAction::Unchanged, Payload::None));
        };

        if self.check_mode {
            return Ok(self
                .outcome(descriptor, state, ReconcileAction::Removed, Payload::Record(record))
                .changed()
                .with_message(format!("Would remove {}", descriptor.label())));
        }

        info!("Removing {} (id {id})", descriptor.label());
        self.transport
            .mutate(&MutationRequest::remove(kind, id))
            .await?;

        Ok(self
            .outcome(descriptor, state, ReconcileAction::Removed, Payload::Record(record))
            .changed())
    }

    async fn ensure_created(&self, descriptor: &ResourceDescriptor) -> Result<ReconcileOutcome> {
        let kind = descriptor.kind();
        let state = DesiredState::Present;
        let profile = kind.profile();

        if !profile.capabilities.create {
            return Ok(self
                .outcome(descriptor, state, ReconcileAction::Unsupported, Payload::None)
                .with_message("Create not implemented"));
        }

        if let Some(field) = descriptor.missing_create_field() {
            return Err(ValidationError::MissingField {
                kind: kind.to_string(),
                operation: String::from("create"),
                field,
            }
            .into());
        }

        let changes = FieldDiff::all_new(descriptor).changes;

        if self.check_mode {
            return Ok(self
                .outcome(descriptor, state, ReconcileAction::Created, Payload::None)
                .with_changes(changes)
                .changed()
                .with_message(format!("Would create {}", descriptor.label())));
        }

        info!("Creating {}", descriptor.label());
        let response = match self
            .transport
            .mutate(&MutationRequest::create(
                kind,
                descriptor.desired_fields().clone(),
            ))
            .await
        {
            Ok(Value::String(text)) if reports_existing(&text) => {
                return Ok(self.already_exists(descriptor).await);
            }
            Ok(response) => response,
            Err(e) if reports_existing(&e.to_string()) => {
                return Ok(self.already_exists(descriptor).await);
            }
            Err(e) => return Err(e),
        };

        let payload = self.confirm(descriptor, None, &response).await;

        Ok(self
            .outcome(descriptor, state, ReconcileAction::Created, payload)
            .with_changes(changes)
            .changed())
    }

    /// Outcome for a create the backend refused because the record exists.
    async fn already_exists(&self, descriptor: &ResourceDescriptor) -> ReconcileOutcome {
        info!("{} already exists", descriptor.label());
        let payload = match self.match_existing(descriptor).await {
            Ok(record) => Payload::from(record),
            Err(e) => {
                warn!("Failed to read back {}: {e}", descriptor.label());
                Payload::None
            }
        };
        self.outcome(descriptor, DesiredState::Present, ReconcileAction::Unchanged, payload)
            .with_message(format!("{} already exists", descriptor.kind()))
    }

    async fn ensure_updated(
        &self,
        descriptor: &ResourceDescriptor,
        record: Record,
    ) -> Result<ReconcileOutcome> {
        let kind = descriptor.kind();
        let state = DesiredState::Present;

        let diff = compute_diff(descriptor, &record);
        if diff.is_empty() {
            debug!("{} is up to date", descriptor.label());
            return Ok(self.outcome(descriptor, state, ReconcileAction::Unchanged, Payload::Record(record)));
        }

        if !kind.profile().capabilities.update {
            return Ok(self
                .outcome(descriptor, state, ReconcileAction::Unsupported, Payload::Record(record))
                .with_message("Update not implemented"));
        }

        let Some(id) = record_id(&record) else {
            return Ok(self.outcome(descriptor, state, ReconcileAction::Unchanged, Payload::Record(record)));
        };

        if self.check_mode {
            return Ok(self
                .outcome(descriptor, state, ReconcileAction::Updated, Payload::Record(record))
                .with_changes(diff.changes)
                .changed()
                .with_message(format!("Would update {}", descriptor.label())));
        }

        info!(
            "Updating {} (id {id}): {}",
            descriptor.label(),
            diff.field_names().join(", ")
        );
        let mut fields = diff.changed_fields();
        fields.extend(descriptor.write_only_fields());
        let response = self
            .transport
            .mutate(&MutationRequest::update(kind, id.clone(), fields))
            .await?;

        let payload = self.confirm(descriptor, Some(id), &response).await;

        Ok(self
            .outcome(descriptor, state, ReconcileAction::Updated, payload)
            .with_changes(diff.changes)
            .changed())
    }

    /// Reads the record back after a mutation.
    ///
    /// The mutation already happened, so a failed read-back is logged rather
    /// than reported as an error.
    async fn confirm(
        &self,
        descriptor: &ResourceDescriptor,
        known_id: Option<Value>,
        response: &Value,
    ) -> Payload {
        match self.resolve(descriptor).await {
            Ok(Some(record)) => return Payload::Record(record),
            Ok(None) => {}
            Err(e) => warn!("Failed to read back {}: {e}", descriptor.label()),
        }

        let id = known_id.or_else(|| response_id(response));
        let Some(id) = id else {
            warn!("Could not read back {}: no identifier known", descriptor.label());
            return Payload::None;
        };

        match self
            .lookup(descriptor.kind(), &IdentityKey::new(ID_KEY, id))
            .await
        {
            Ok(record) => Payload::from(record),
            Err(e) => {
                warn!("Failed to read back {}: {e}", descriptor.label());
                Payload::None
            }
        }
    }

    fn outcome(
        &self,
        descriptor: &ResourceDescriptor,
        state: DesiredState,
        action: ReconcileAction,
        payload: Payload,
    ) -> ReconcileOutcome {
        ReconcileOutcome {
            kind: descriptor.kind(),
            target: descriptor.label(),
            state,
            changed: false,
            action,
            changes: Vec::new(),
            payload,
            message: None,
            check_mode: self.check_mode,
        }
    }
}

impl ReconcileOutcome {
    const fn changed(mut self) -> Self {
        self.changed = true;
        self
    }

    fn with_changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = changes;
        self
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Returns true if a backend message says the record is already there.
fn reports_existing(message: &str) -> bool {
    message.to_ascii_lowercase().contains("already exists")
}

fn record_id(record: &Record) -> Option<Value> {
    record.get(ID_KEY).filter(|v| !v.is_null()).cloned()
}

/// Extracts an identifier from a mutation response: `{"id": N}`, a bare
/// number, or a one-record list.
fn response_id(response: &Value) -> Option<Value> {
    match response {
        Value::Object(map) => record_id(map),
        Value::Number(_) => Some(response.clone()),
        Value::Array(items) => items.first().and_then(response_id),
        _ => None,
    }
}
