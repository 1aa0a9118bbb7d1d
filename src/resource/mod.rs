//! Resource model for MultiFlexi entities.
//!
//! This module defines what the reconciler works on:
//! - Resource kinds and their static profiles
//! - Descriptors holding identity keys and desired fields
//! - Field-level diffing with value normalisation

mod descriptor;
mod diff;
mod kind;

pub use descriptor::{render_scalar, IdentityKey, Record, ResourceDescriptor, ID_KEY};
pub use diff::{canonical_bool, canonical_set, compute_diff, values_match, FieldChange, FieldDiff};
pub use kind::{Capabilities, ResourceKind, ResourceProfile};
