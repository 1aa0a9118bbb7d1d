//! Field-level diff between desired and observed records.
//!
//! Values are normalised before comparison: booleans accept the usual
//! spellings (`true`, `1`, `"yes"`, `"on"`), set-valued fields compare as
//! unordered sets and numbers compare by value against numeric strings, since
//! the backend frequently returns numeric columns as strings.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::trace;

use super::descriptor::{render_scalar, Record, ResourceDescriptor};
use super::kind::ResourceProfile;

/// A single field that differs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    /// Field name.
    pub field: String,
    /// Observed value, `None` if the backend did not return the field.
    pub old_value: Option<Value>,
    /// Desired value.
    pub new_value: Value,
}

/// All differing fields of one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldDiff {
    /// Differing fields in desired-field order.
    pub changes: Vec<FieldChange>,
}

impl FieldDiff {
    /// Returns true if nothing differs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the number of differing fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns the changed fields with their desired values, ready to send.
    #[must_use]
    pub fn changed_fields(&self) -> Record {
        self.changes
            .iter()
            .map(|c| (c.field.clone(), c.new_value.clone()))
            .collect()
    }

    /// Returns the names of the differing fields.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.field.as_str()).collect()
    }

    /// Builds a diff listing every desired field as new, used for creation.
    #[must_use]
    pub fn all_new(descriptor: &ResourceDescriptor) -> Self {
        Self {
            changes: descriptor
                .desired_fields()
                .iter()
                .map(|(field, value)| FieldChange {
                    field: field.clone(),
                    old_value: None,
                    new_value: value.clone(),
                })
                .collect(),
        }
    }
}

/// Computes the fields of `descriptor` that differ from `remote`.
///
/// Ignored and write-only fields never appear in the result.
#[must_use]
pub fn compute_diff(descriptor: &ResourceDescriptor, remote: &Record) -> FieldDiff {
    let profile = descriptor.kind().profile();

    let changes = descriptor
        .desired_fields()
        .iter()
        .filter(|(field, _)| !descriptor.is_ignored(field))
        .filter_map(|(field, desired)| {
            let observed = remote.get(field.as_str());
            let same = observed.is_some_and(|o| values_match(profile, field, desired, o));
            trace!("compare {field}: desired={desired} observed={observed:?} same={same}");
            (!same).then(|| FieldChange {
                field: field.clone(),
                old_value: observed.cloned(),
                new_value: desired.clone(),
            })
        })
        .collect();

    FieldDiff { changes }
}

/// Returns true if the observed value satisfies the desired one.
#[must_use]
pub fn values_match(profile: &ResourceProfile, field: &str, desired: &Value, observed: &Value) -> bool {
    if profile.is_set_field(field) {
        if let (Some(a), Some(b)) = (canonical_set(desired), canonical_set(observed)) {
            return a == b;
        }
    }

    if profile.is_bool_field(field) || desired.is_boolean() || observed.is_boolean() {
        return match (canonical_bool(desired), canonical_bool(observed)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
    }

    if desired.is_number() || observed.is_number() {
        if let (Some(a), Some(b)) = (canonical_number(desired), canonical_number(observed)) {
            return (a - b).abs() < f64::EPSILON;
        }
    }

    match (desired, observed) {
        (Value::Null, Value::Null) => true,
        (Value::String(_) | Value::Number(_), Value::String(_) | Value::Number(_)) => {
            render_scalar(desired) == render_scalar(observed)
        }
        _ => desired == observed,
    }
}

/// Normalises a boolean-like value.
#[must_use]
pub fn canonical_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "y" => Some(true),
            "false" | "0" | "no" | "off" | "n" | "" => Some(false),
            _ => None,
        },
        Value::Null => Some(false),
        _ => None,
    }
}

/// Reads a number or a numeric string.
fn canonical_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalises a set-like value: a list, or a comma-separated string.
#[must_use]
pub fn canonical_set(value: &Value) -> Option<BTreeSet<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| render_scalar(v).trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        Value::String(s) => Some(
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        Value::Null => Some(BTreeSet::new()),
        _ => None,
    }
}
