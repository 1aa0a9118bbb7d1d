//! CLI module for the MultiFlexi reconciler.
//!
//! This module provides the command-line interface: argument parsing and
//! output formatting.

mod commands;
mod output;

pub use commands::{
    parse_assignment, ArtifactCommands, Cli, Commands, ConnectionArgs, EncryptionCommands,
    ErasureCommands, OutputFormat, QueueCommands, ResourceArgs, TokenCommands,
};
pub use output::OutputFormatter;
