//! Configuration module for the MultiFlexi reconciler.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `multiflexi.yaml`
//! - Environment and `.env` overrides for connection settings
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{
    find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, ENV_API_URL, ENV_CLI_PATH,
    ENV_PASSWORD, ENV_TRANSPORT, ENV_USERNAME,
};
pub use spec::{ConnectionConfig, MultiflexiConfig, ResourceTask, TransportKind};
pub use validator::{ConfigValidator, ValidationResult};
