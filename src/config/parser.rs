//! Configuration parser for loading task files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, MultiflexiError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::spec::{MultiflexiConfig, TransportKind};

/// Environment variable selecting the transport.
pub const ENV_TRANSPORT: &str = "MULTIFLEXI_TRANSPORT";
/// Environment variable holding the REST API base URL.
pub const ENV_API_URL: &str = "MULTIFLEXI_API_URL";
/// Environment variable holding the API user.
pub const ENV_USERNAME: &str = "MULTIFLEXI_USERNAME";
/// Environment variable holding the API password.
pub const ENV_PASSWORD: &str = "MULTIFLEXI_PASSWORD";
/// Environment variable holding the `multiflexi-cli` path.
pub const ENV_CLI_PATH: &str = "MULTIFLEXI_CLI_PATH";

/// Configuration parser for loading task files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<MultiflexiConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(MultiflexiError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            MultiflexiError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<MultiflexiConfig> {
        debug!("Parsing YAML configuration");

        // An empty file is a valid, empty task list.
        if content.trim().is_empty() {
            return Ok(MultiflexiConfig::default());
        }

        let config: MultiflexiConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            MultiflexiError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed {} resource task(s) and {} operation(s)",
            config.resources.len(),
            config.operations.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<MultiflexiConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies `MULTIFLEXI_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if `MULTIFLEXI_TRANSPORT` names an unknown transport.
    pub fn apply_env_overrides<F>(config: &mut MultiflexiConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection = &mut config.connection;

        if let Some(transport) = lookup(ENV_TRANSPORT) {
            debug!("Overriding connection.transport from environment");
            connection.transport = transport.parse::<TransportKind>().map_err(|message| {
                MultiflexiError::Config(ConfigError::validation(message, "connection.transport"))
            })?;
        }

        if let Some(url) = lookup(ENV_API_URL) {
            debug!("Overriding connection.api_url from environment");
            connection.api_url = Some(url);
        }

        if let Some(username) = lookup(ENV_USERNAME) {
            debug!("Overriding connection.username from environment");
            connection.username = Some(username);
        }

        if let Some(password) = lookup(ENV_PASSWORD) {
            debug!("Overriding connection.password from environment");
            connection.password = Some(password);
        }

        if let Some(cli_path) = lookup(ENV_CLI_PATH) {
            debug!("Overriding connection.cli_path from environment");
            connection.cli_path = cli_path;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                MultiflexiError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["multiflexi.yaml", "multiflexi.yml", ".multiflexi.yaml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    warn!("No configuration file found above {}", start.display());
    Err(MultiflexiError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::operations::Operation;
    use crate::reconciler::DesiredState;
    use crate::resource::ResourceKind;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
connection:
  transport: cli
";
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("valid config");

        assert_eq!(config.connection.transport, TransportKind::Cli);
        assert_eq!(config.connection.cli_path, "multiflexi-cli");
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
connection:
  transport: http
  api_url: https://multiflexi.example.com/api/VitexSoftware/MultiFlexi/1.0.0
  username: admin
  password: secret
  timeout_secs: 10

resources:
  - kind: company
    identity:
      code: ACME
    fields:
      name: Acme
      enabled: true
  - kind: run_template
    state: absent
    identity:
      id: 12
  - kind: user
    state: get
    identity:
      login: jdoe
    ignore_fields: [settings]

operations:
  - op: queue_truncate
  - op: erasure_approve
    request_id: 4
    notes: ok
"#;
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("valid config");

        assert_eq!(config.connection.timeout_secs, 10);
        assert_eq!(config.resources.len(), 3);
        assert_eq!(config.resources[0].kind, ResourceKind::Company);
        assert_eq!(config.resources[0].fields.get("enabled"), Some(&json!(true)));
        assert_eq!(config.resources[1].state, DesiredState::Absent);
        assert_eq!(config.resources[2].ignore_fields, vec!["settings"]);
        assert_eq!(config.operations.len(), 2);
        assert_eq!(config.operations[0], Operation::QueueTruncate);
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let yaml = "resources:\n  - kind: spaceship\n";
        assert!(ConfigParser::new().parse_yaml(yaml, None).is_err());
    }

    #[test]
    fn test_empty_file_is_empty_config() {
        let config = ConfigParser::new()
            .parse_yaml("   \n", None)
            .expect("empty config");
        assert_eq!(config, MultiflexiConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_TRANSPORT, "cli"),
            (ENV_CLI_PATH, "/usr/bin/multiflexi-cli"),
            (ENV_PASSWORD, "from-env"),
        ]);
        let mut config = MultiflexiConfig {
            connection: ConnectionConfig {
                password: Some(String::from("from-file")),
                ..ConnectionConfig::default()
            },
            ..MultiflexiConfig::default()
        };

        ConfigParser::apply_env_overrides(&mut config, |name| {
            env.get(name).map(|v| (*v).to_string())
        })
        .expect("valid overrides");

        assert_eq!(config.connection.transport, TransportKind::Cli);
        assert_eq!(config.connection.cli_path, "/usr/bin/multiflexi-cli");
        assert_eq!(config.connection.password.as_deref(), Some("from-env"));
        assert_eq!(config.connection.api_url, None);
    }

    #[test]
    fn test_invalid_transport_override() {
        let mut config = MultiflexiConfig::default();
        let result = ConfigParser::apply_env_overrides(&mut config, |name| {
            (name == ENV_TRANSPORT).then(|| String::from("carrier-pigeon"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = TempDir::new().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("multiflexi.yaml"), "resources: []\n").expect("write");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, dir.path().join("multiflexi.yaml"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().expect("tempdir");
        let err = ConfigParser::new()
            .load_file(dir.path().join("nope.yaml"))
            .expect_err("missing");
        assert!(matches!(
            err,
            MultiflexiError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
