//! Configuration parser for loading topology files.
//!
//! This module handles loading the topology from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, StackplanError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::TopologyConfig;

/// Environment variable holding the HTTP provider bearer token.
pub const PROVIDER_TOKEN_VAR: &str = "STACKPLAN_PROVIDER_TOKEN";

/// Configuration parser for loading topology configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
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
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<TopologyConfig> {
        let path = path.as_ref();
        info!("Loading topology from: {}", path.display());

        if !path.exists() {
            return Err(StackplanError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StackplanError::Config(ConfigError::ParseError {
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
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<TopologyConfig> {
        debug!("Parsing YAML topology");

        let config: TopologyConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StackplanError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed topology for project {} with {} resources",
            config.project.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `STACKPLAN_<SECTION>_<KEY>` (e.g., `STACKPLAN_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<TopologyConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides from `lookup` to the configuration.
    pub fn apply_overrides(config: &mut TopologyConfig, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("STACKPLAN_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(env) = lookup("STACKPLAN_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Some(bucket) = lookup("STACKPLAN_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup("STACKPLAN_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(endpoint) = lookup("STACKPLAN_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }
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
                StackplanError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the HTTP provider token from environment (optional).
    #[must_use]
    pub fn get_provider_token() -> Option<String> {
        std::env::var(PROVIDER_TOKEN_VAR).ok().filter(|t| !t.is_empty())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "stackplan.yaml",
    "stackplan.yml",
    "topology.yaml",
    "topology.yml",
];

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

    Err(StackplanError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderType, StateBackend};
    use crate::graph::ResourceKind;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: test-project
resources: []
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");

        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.environment, "dev");
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
project:
  name: xray-tracing
  environment: prod

state:
  backend: s3
  bucket: stackplan-state
  prefix: xray/prod

provider:
  type: http
  endpoint: https://provision.internal
  timeout_secs: 10

guardrails:
  max_deletes: 2
  prevent_destroy: [db]

resources:
  - id: net
    kind: network
    properties:
      max_azs: 2
  - id: db
    kind: database
    depends_on: [net]
    properties:
      engine: aurora-mysql
      scaling: { min_capacity: 8, max_capacity: 32 }
  - id: task
    kind: task_definition
    dependsOn: [net]
    wiring:
      - { property: rds_hostname, from: db, output: endpoint }
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");

        assert_eq!(config.state.backend, StateBackend::S3);
        assert_eq!(config.provider.provider_type, ProviderType::Http);
        assert_eq!(config.provider.timeout_secs, Some(10));
        assert_eq!(config.resources.len(), 3);
        assert_eq!(config.resources[2].kind, ResourceKind::TaskDefinition);
        assert_eq!(config.resources[2].wiring[0].source, "db");
        assert_eq!(
            config.guardrails.as_ref().map(|g| g.prevent_destroy.clone()),
            Some(vec![String::from("db")])
        );
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let yaml = r"
project: { name: demo }
resources:
  - { id: q, kind: queue }
";
        let err = ConfigParser::new().parse_yaml(yaml, None).expect_err("bad kind");
        assert!(matches!(err, StackplanError::Config(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new()
            .parse_yaml("project: { name: demo }", None)
            .expect("parse");
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STACKPLAN_PROJECT_ENVIRONMENT", "staging"),
            ("STACKPLAN_STATE_BUCKET", "bucket-1"),
            ("STACKPLAN_PROVIDER_ENDPOINT", "http://localhost:9000"),
        ]);

        ConfigParser::apply_overrides(&mut config, |name| {
            vars.get(name).map(ToString::to_string)
        });

        assert_eq!(config.project.name, "demo");
        assert_eq!(config.project.environment, "staging");
        assert_eq!(config.state.bucket.as_deref(), Some("bucket-1"));
        assert_eq!(
            config.provider.endpoint.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = TempDir::new().expect("temp dir");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(temp.path().join("topology.yml"), "project: { name: x }").expect("write");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, temp.path().join("topology.yml"));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().expect("temp dir");
        let err = ConfigParser::new()
            .load_file(temp.path().join("stackplan.yaml"))
            .expect_err("missing");
        assert!(matches!(err, StackplanError::Config(ConfigError::FileNotFound { .. })));
    }
}
