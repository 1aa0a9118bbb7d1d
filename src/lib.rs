// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # MultiFlexi Reconcile
//!
//! Declarative, idempotent management of [MultiFlexi](https://multiflexi.eu)
//! resources: applications, companies, users, credentials, run templates and
//! more.
//!
//! ## Overview
//!
//! Describe the records you want and the reconciler makes the backend match:
//!
//! - Create a record when none matches its identity keys
//! - Update only the fields that differ from the desired values
//! - Remove a record when it should be absent
//! - Report `changed: false` when nothing needs to happen
//! - Predict every change without touching the backend in check mode
//!
//! ## Architecture
//!
//! Every pass follows the same steps:
//!
//! 1. **Resolve**: Find the record by its most specific identity key
//! 2. **Compare**: Diff desired fields against the record, normalising values
//! 3. **Converge**: Create, update or remove through a [`transport::Transport`]
//! 4. **Confirm**: Read the record back and report it
//!
//! Two transports reach the backend: the REST API ([`transport::HttpTransport`])
//! and the `multiflexi-cli` tool ([`transport::ProcessTransport`]).
//!
//! ## Modules
//!
//! - [`config`]: Task file parsing and validation
//! - [`resource`]: Resource kinds, descriptors and field diffing
//! - [`transport`]: REST and `multiflexi-cli` backends
//! - [`reconciler`]: Single-resource reconciliation engine
//! - [`operations`]: Imperative maintenance operations
//! - [`executor`]: Applying whole task files
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! connection:
//!   transport: cli
//!
//! resources:
//!   - kind: company
//!     identity:
//!       code: ACME
//!     fields:
//!       name: Acme Corporation
//!       enabled: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod operations;
pub mod reconciler;
pub mod resource;
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, MultiflexiConfig};
pub use error::{MultiflexiError, Result};
pub use executor::{ExecutionResult, TaskExecutor};
pub use operations::{Operation, OperationOutcome, OperationRunner};
pub use reconciler::{DesiredState, ReconcileOutcome, Reconciler};
pub use resource::{ResourceDescriptor, ResourceKind};
pub use transport::{connect, HttpTransport, ProcessTransport, Transport};
