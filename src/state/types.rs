//! Snapshot types.
//!
//! A snapshot is the last-known-applied state of a topology: one record per
//! resource with the declared properties it was applied with, its recorded
//! dependencies and the provider handle it resolved to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StateError;
use crate::graph::{PropertyBag, ResourceKind, ResourceNode, Wire};
use crate::provider::ProviderHandle;

/// Current version of the snapshot format.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Number of history entries kept in a snapshot.
pub const MAX_HISTORY: usize = 100;

/// The complete last-applied snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last fully applied topology.
    #[serde(default)]
    pub topology_hash: String,
    /// Applied resources keyed by identifier.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// When the snapshot was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Last-applied record of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    /// Resource identifier.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Declared properties at the time of the last apply.
    #[serde(default)]
    pub properties: PropertyBag,
    /// Dependencies at the time of the last apply.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Wiring at the time of the last apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wiring: Vec<Wire>,
    /// Provider handle.
    pub handle: ProviderHandle,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Topology hash the plan was computed from.
    pub topology_hash: String,
    /// Resources touched by successful steps.
    pub resources: Vec<String>,
    /// Whether every step succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Apply of a topology.
    Apply,
    /// Destruction of everything recorded.
    Destroy,
}

impl Snapshot {
    /// Creates a new empty snapshot.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            topology_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Checks that the snapshot was written in a supported format.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::VersionMismatch`] for any other version.
    pub fn check_version(&self) -> Result<(), StateError> {
        if self.version == SNAPSHOT_VERSION {
            Ok(())
        } else {
            Err(StateError::VersionMismatch {
                expected: SNAPSHOT_VERSION.to_string(),
                found: self.version.clone(),
            })
        }
    }

    /// Gets a record by identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    /// Records a node as applied with `handle`.
    ///
    /// Keeps the creation time of an existing record.
    pub fn record(&mut self, node: &ResourceNode, handle: ProviderHandle) {
        let now = Utc::now();
        let created_at = self.resources.get(&node.id).map_or(now, |r| r.created_at);

        self.resources.insert(
            node.id.clone(),
            ResourceRecord {
                id: node.id.clone(),
                kind: node.kind,
                properties: node.properties.clone(),
                dependencies: node.dependencies.clone(),
                wiring: node.wiring.clone(),
                handle,
                created_at,
                updated_at: now,
            },
        );
        self.last_updated = now;
    }

    /// Refreshes the recorded dependencies of an unchanged node.
    pub fn refresh_dependencies(&mut self, node: &ResourceNode) {
        if let Some(record) = self.resources.get_mut(&node.id) {
            if record.dependencies != node.dependencies {
                record.dependencies.clone_from(&node.dependencies);
                self.last_updated = Utc::now();
            }
        }
    }

    /// Removes a record by identifier.
    pub fn remove(&mut self, id: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns the provider handles of every record.
    #[must_use]
    pub fn handles(&self) -> BTreeMap<String, ProviderHandle> {
        self.resources
            .iter()
            .map(|(id, r)| (id.clone(), r.handle.clone()))
            .collect()
    }

    /// Returns the number of recorded resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceRecord {
    /// Rebuilds the node this record was applied from.
    #[must_use]
    pub fn to_node(&self) -> ResourceNode {
        ResourceNode {
            id: self.id.clone(),
            kind: self.kind,
            properties: self.properties.clone(),
            dependencies: self.dependencies.clone(),
            wiring: self.wiring.clone(),
        }
    }
}

impl HistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: RunOperation, topology_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            topology_hash: topology_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: RunOperation,
        topology_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            topology_hash: topology_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
