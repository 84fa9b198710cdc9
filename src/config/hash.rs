//! Topology hashing for change detection.
//!
//! Hashes are computed over a canonical form of each declaration so that key
//! order in the YAML file never changes the result.

use sha2::{Digest, Sha256};

use crate::graph::PropertyBag;

use super::spec::{ResourceDecl, TopologyConfig};

/// Hasher for computing topology hashes.
#[derive(Debug, Default)]
pub struct TopologyHasher;

impl TopologyHasher {
    /// Creates a new topology hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the whole topology.
    ///
    /// Covers the project identity and every resource declaration, in
    /// declaration order. State, provider and guardrail settings are excluded.
    #[must_use]
    pub fn hash_topology(&self, config: &TopologyConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(config.project.environment.as_bytes());

        for resource in &config.resources {
            hasher.update([0u8]);
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource declaration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceDecl) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.kind.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.hash_properties(&resource.properties).as_bytes());

        let mut deps: Vec<&String> = resource.depends_on.iter().collect();
        deps.sort_unstable();
        deps.dedup();
        for dep in deps {
            hasher.update(b"dep:");
            hasher.update(dep.as_bytes());
        }

        let mut wires: Vec<_> = resource.wiring.iter().collect();
        wires.sort_by(|a, b| a.property.cmp(&b.property));
        for wire in wires {
            hasher.update(b"wire:");
            hasher.update(wire.property.as_bytes());
            hasher.update([0u8]);
            hasher.update(wire.source.as_bytes());
            hasher.update([0u8]);
            hasher.update(wire.output.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of a property bag.
    ///
    /// Nested objects are serialized with sorted keys.
    #[must_use]
    pub fn hash_properties(&self, properties: &PropertyBag) -> String {
        let canonical = serde_json::to_string(properties).unwrap_or_default();
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}
