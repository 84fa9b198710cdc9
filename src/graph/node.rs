//! Resource node types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping of property name to value.
///
/// Keys are ordered, so two bags built with different insertion orders
/// compare equal and serialize identically.
pub type PropertyBag = BTreeMap<String, serde_json::Value>;

/// Kinds of resources a topology can declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual network (VPC, subnets, security groups).
    Network,
    /// Container cluster.
    Cluster,
    /// Database cluster.
    Database,
    /// Container task definition.
    TaskDefinition,
    /// Long-running service.
    Service,
    /// Load balancer fronting a service.
    LoadBalancer,
    /// Autoscaling policy.
    ScalingPolicy,
    /// Access role.
    Role,
}

/// A property whose value is threaded from an upstream resource's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wire {
    /// Property on the consuming resource.
    pub property: String,
    /// Identifier of the upstream resource.
    #[serde(rename = "from")]
    pub source: String,
    /// Output name on the upstream provider handle.
    pub output: String,
}

/// A resource in the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceNode {
    /// Identifier, unique within the graph.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Declared properties.
    pub properties: PropertyBag,
    /// Identifiers of the resources this one depends on.
    pub dependencies: Vec<String>,
    /// Wired properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wiring: Vec<Wire>,
}

impl ResourceNode {
    /// Returns true if this node depends directly on `id`.
    #[must_use]
    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.iter().any(|d| d == id)
    }

    /// Returns the wiring sources of this node.
    pub fn wire_sources(&self) -> impl Iterator<Item = &str> {
        self.wiring.iter().map(|w| w.source.as_str())
    }
}

impl ResourceKind {
    /// Returns the short prefix used for provider identifiers.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Network => "net",
            Self::Cluster => "cls",
            Self::Database => "db",
            Self::TaskDefinition => "task",
            Self::Service => "svc",
            Self::LoadBalancer => "lb",
            Self::ScalingPolicy => "scale",
            Self::Role => "role",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Cluster => "cluster",
            Self::Database => "database",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::LoadBalancer => "load_balancer",
            Self::ScalingPolicy => "scaling_policy",
            Self::Role => "role",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.kind)
    }
}
