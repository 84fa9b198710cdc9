//! Configuration specification types for stackplan.
//!
//! This module defines all the structs that map to the `stackplan.yaml` file.
//! These types are designed to be declarative and fully describe the desired
//! topology: which resources exist, how they depend on each other, and where the
//! last-applied snapshot lives.

use serde::{Deserialize, Serialize};

use crate::graph::{PropertyBag, ResourceKind, Wire};

/// The root configuration structure for a stackplan topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Snapshot backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider adapter configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Optional guardrails configuration.
    #[serde(default)]
    pub guardrails: Option<GuardrailsConfig>,
    /// Resource declarations, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Snapshot backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// Snapshot backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based storage.
    #[default]
    Local,
    /// AWS S3-based storage.
    S3,
}

/// Provider adapter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Adapter type.
    #[serde(default, rename = "type")]
    pub provider_type: ProviderType,
    /// Base URL of the REST endpoint (http adapter).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Inventory directory (local adapter).
    #[serde(default)]
    pub path: Option<String>,
    /// Request timeout in seconds (http adapter).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Provider adapter types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Simulated inventory kept on the local filesystem.
    #[default]
    Local,
    /// Generic REST provisioning endpoint.
    Http,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDecl {
    /// Identifier, unique within the topology.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Declared properties.
    #[serde(default)]
    pub properties: PropertyBag,
    /// Identifiers this resource depends on.
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,
    /// Properties filled from upstream outputs at apply time.
    #[serde(default)]
    pub wiring: Vec<Wire>,
}

/// Guardrails applied to every plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardrailsConfig {
    /// Maximum number of deletions a single plan may contain.
    #[serde(default)]
    pub max_deletes: Option<usize>,
    /// Identifiers that must never be deleted.
    #[serde(default)]
    pub prevent_destroy: Vec<String>,
    /// Reject roles that attach `*FullAccess` managed policies.
    #[serde(default)]
    pub forbid_broad_policies: bool,
}

fn default_environment() -> String {
    String::from("dev")
}

impl TopologyConfig {
    /// Returns the declaration for an identifier.
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&ResourceDecl> {
        self.resources.iter().find(|r| r.id == id)
    }
}

impl ResourceDecl {
    /// Creates a declaration with no properties, dependencies or wiring.
    #[must_use]
    pub fn new(id: &str, kind: ResourceKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            properties: PropertyBag::new(),
            depends_on: Vec::new(),
            wiring: Vec::new(),
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, id: &str) -> Self {
        self.depends_on.push(id.to_string());
        self
    }

    /// Sets a property.
    #[must_use]
    pub fn property(mut self, key: &str, value: serde_json::Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    /// Adds a wire that fills `property` from `source`'s `output`.
    #[must_use]
    pub fn wire(mut self, property: &str, source: &str, output: &str) -> Self {
        self.wiring.push(Wire {
            property: property.to_string(),
            source: source.to_string(),
            output: output.to_string(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depends_on_alias() {
        let yaml = r"
id: svc
kind: service
dependsOn: [net, db]
";
        let decl: ResourceDecl = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(decl.depends_on, vec!["net", "db"]);
        assert_eq!(decl.kind, ResourceKind::Service);
    }

    #[test]
    fn test_defaults() {
        let yaml = r"
project:
  name: demo
";
        let config: TopologyConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.provider.provider_type, ProviderType::Local);
        assert!(config.resources.is_empty());
    }
}
