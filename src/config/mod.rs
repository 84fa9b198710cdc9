//! Configuration module for stackplan.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stackplan.yaml`
//! - Validation of configuration values
//! - Computing topology hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::TopologyHasher;
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR};
pub use spec::{
    GuardrailsConfig, ProjectConfig, ProviderConfig, ProviderType, ResourceDecl, StateBackend,
    StateConfig, TopologyConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
