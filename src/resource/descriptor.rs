//! Resource descriptors: the desired state of one resource for one pass.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::{Result, ValidationError};

use super::kind::ResourceKind;

/// A record as returned by the backend: field name to value.
pub type Record = serde_json::Map<String, Value>;

/// Name of the numeric identity key every kind shares.
pub const ID_KEY: &str = "id";

/// An alternative unique lookup attribute with its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityKey {
    /// Key name (`id`, `uuid`, `name`, `code`, `login`, ...).
    pub name: String,
    /// Value to look up.
    pub value: Value,
}

impl IdentityKey {
    /// Creates a new identity key.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns true if this is the numeric `id` key.
    #[must_use]
    pub fn is_id(&self) -> bool {
        self.name == ID_KEY
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, render_scalar(&self.value))
    }
}

/// Desired state of a single resource.
///
/// Identity keys are kept sorted by the kind's priority so resolution always
/// tries the most specific key first, whatever order the caller used.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDescriptor {
    kind: ResourceKind,
    identity_keys: Vec<IdentityKey>,
    desired_fields: Record,
    ignored_fields: BTreeSet<String>,
}

impl ResourceDescriptor {
    /// Creates an empty descriptor for a kind.
    #[must_use]
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            identity_keys: Vec::new(),
            desired_fields: Record::new(),
            ignored_fields: BTreeSet::new(),
        }
    }

    /// Builds a descriptor from explicit identity keys and desired fields.
    ///
    /// A field named after one of the kind's identity keys also becomes an
    /// identity key unless one with that name was given explicitly. An `id`
    /// field, or an alias of it such as `relation_id`, is identity only.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit identity key is unknown for the kind.
    pub fn from_parts(
        kind: ResourceKind,
        identity: &Record,
        fields: &Record,
        ignored: &[String],
    ) -> Result<Self> {
        let mut descriptor = Self::new(kind);

        for (name, value) in identity {
            descriptor = descriptor.with_identity(name, value.clone())?;
        }

        let profile = kind.profile();
        for (name, value) in fields {
            if profile.canonical_key(name) == ID_KEY {
                if descriptor.identity_value(ID_KEY).is_none() {
                    descriptor = descriptor.with_identity(ID_KEY, value.clone())?;
                }
                continue;
            }
            if profile.identity_rank(name).is_some() && descriptor.identity_value(name).is_none() {
                descriptor = descriptor.with_identity(name, value.clone())?;
            }
            descriptor = descriptor.with_field(name, value.clone());
        }

        for field in ignored {
            descriptor = descriptor.with_ignored(field);
        }

        Ok(descriptor)
    }

    /// Adds (or replaces) an identity key. Null values are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not an identity key of the kind.
    pub fn with_identity(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        let profile = self.kind.profile();
        let name = profile.canonical_key(name);
        let Some(rank) = profile.identity_rank(name) else {
            return Err(ValidationError::UnknownIdentityKey {
                kind: self.kind.to_string(),
                key: name.to_string(),
                expected: profile.identity_keys.join(", "),
            }
            .into());
        };

        let value = value.into();
        if value.is_null() {
            return Ok(self);
        }

        self.identity_keys.retain(|k| k.name != name);
        let position = self
            .identity_keys
            .iter()
            .position(|k| profile.identity_rank(&k.name).is_some_and(|r| r > rank))
            .unwrap_or(self.identity_keys.len());
        self.identity_keys.insert(position, IdentityKey::new(name, value));

        Ok(self)
    }

    /// Adds a desired field. Null values mean "not managed" and are dropped.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let name = name.into();
        if value.is_null() {
            self.desired_fields.remove(&name);
        } else {
            self.desired_fields.insert(name, value);
        }
        self
    }

    /// Excludes a field from change detection for this descriptor.
    #[must_use]
    pub fn with_ignored(mut self, field: impl Into<String>) -> Self {
        self.ignored_fields.insert(field.into());
        self
    }

    /// Returns the resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Returns the identity keys, most specific first.
    #[must_use]
    pub fn identity_keys(&self) -> &[IdentityKey] {
        &self.identity_keys
    }

    /// Returns true if at least one identity key was supplied.
    #[must_use]
    pub fn has_identity(&self) -> bool {
        !self.identity_keys.is_empty()
    }

    /// Returns the value of an identity key, if supplied.
    #[must_use]
    pub fn identity_value(&self, name: &str) -> Option<&Value> {
        self.identity_keys
            .iter()
            .find(|k| k.name == name)
            .map(|k| &k.value)
    }

    /// Returns the desired fields.
    #[must_use]
    pub const fn desired_fields(&self) -> &Record {
        &self.desired_fields
    }

    /// Returns the desired fields the backend accepts but never reports back,
    /// such as a user password. They ride along with every write.
    #[must_use]
    pub fn write_only_fields(&self) -> Record {
        let profile = self.kind.profile();
        self.desired_fields
            .iter()
            .filter(|(field, _)| profile.is_write_only(field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    /// Returns the first field a create of this descriptor would lack, or
    /// `a or b` when one of several alternatives is needed.
    #[must_use]
    pub fn missing_create_field(&self) -> Option<String> {
        let profile = self.kind.profile();
        let fields = &self.desired_fields;

        if let Some(field) = profile
            .required_on_create
            .iter()
            .find(|field| !fields.contains_key(**field))
        {
            return Some((*field).to_string());
        }

        let any_of = profile.one_of_on_create;
        (!any_of.is_empty() && !any_of.iter().any(|field| fields.contains_key(*field)))
            .then(|| any_of.join(" or "))
    }

    /// Returns true if the field takes no part in change detection.
    #[must_use]
    pub fn is_ignored(&self, field: &str) -> bool {
        self.kind.profile().is_write_only(field) || self.ignored_fields.contains(field)
    }

    /// Returns a short human-readable label, e.g. `company code=ACME`.
    #[must_use]
    pub fn label(&self) -> String {
        self.identity_keys.first().map_or_else(
            || format!("{} (new)", self.kind),
            |key| format!("{} {key}", self.kind),
        )
    }
}

/// Renders a JSON scalar the way it would be typed on a command line.
///
/// Strings are rendered without quotes, lists are comma-joined and objects
/// fall back to compact JSON.
#[must_use]
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(render_scalar)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
