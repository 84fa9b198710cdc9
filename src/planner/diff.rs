//! Diff engine for comparing desired state against the last-applied snapshot.
//!
//! Classification is structural: two property bags are equal when they hold
//! the same keys with deeply equal values, whatever order they were written in.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::TopologyHasher;
use crate::graph::{PropertyBag, ResourceGraph, ResourceKind, ResourceNode, Wire};
use crate::state::{ResourceRecord, Snapshot};

/// Engine for computing diffs between a graph and a snapshot.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Property hasher used for display digests.
    hasher: TopologyHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDiff {
    /// Resource identifier.
    pub id: String,
    /// Resource kind (desired kind, or recorded kind for deletes).
    pub kind: ResourceKind,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Why the resource was classified this way.
    pub reason: String,
    /// Field-level details.
    pub details: Vec<DiffDetail>,
    /// Digest of the recorded properties (if any).
    pub old_hash: Option<String>,
    /// Digest of the desired properties (if any).
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs to be updated.
    Update,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Old value, rendered as JSON.
    pub old_value: Option<String>,
    /// New value, rendered as JSON.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    /// Diffs for graph nodes in declaration order, then deletes by identifier.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: TopologyHasher::new(),
        }
    }

    /// Computes the diff between a graph and the last-applied snapshot.
    #[must_use]
    pub fn compute_diff(&self, graph: &ResourceGraph, snapshot: Option<&Snapshot>) -> DiffResult {
        let record_of = |id: &str| snapshot.and_then(|s| s.get(id));

        // Upstream changes must be known before a dependent is classified.
        let mut by_id: HashMap<&str, ResourceDiff> = HashMap::with_capacity(graph.len());
        for node in graph.dependency_order() {
            let mut diff = self.compute_node_diff(node, record_of(&node.id));

            if diff.diff_type == DiffType::NoChange {
                let changed_sources: BTreeSet<&str> = node
                    .wire_sources()
                    .filter(|source| {
                        by_id
                            .get(source)
                            .is_some_and(|d| matches!(d.diff_type, DiffType::Create | DiffType::Update))
                    })
                    .collect();

                if !changed_sources.is_empty() {
                    debug!(
                        "{} is rewired because upstream changed: {:?}",
                        node.id, changed_sources
                    );
                    diff.diff_type = DiffType::Update;
                    diff.reason = String::from("Upstream output may change");
                    diff.details = node
                        .wiring
                        .iter()
                        .filter(|w| changed_sources.contains(w.source.as_str()))
                        .map(|w| DiffDetail {
                            field: format!("wiring.{}", w.property),
                            old_value: None,
                            new_value: Some(format!("{}.{}", w.source, w.output)),
                        })
                        .collect();
                }
            }

            by_id.insert(node.id.as_str(), diff);
        }

        let mut diffs: Vec<ResourceDiff> = graph
            .nodes()
            .iter()
            .filter_map(|node| by_id.remove(node.id.as_str()))
            .collect();

        if let Some(snapshot) = snapshot {
            for record in snapshot.resources.values() {
                if !graph.contains(&record.id) {
                    debug!("Resource {} is no longer declared", record.id);
                    diffs.push(ResourceDiff {
                        id: record.id.clone(),
                        kind: record.kind,
                        diff_type: DiffType::Delete,
                        reason: String::from("Removed from topology"),
                        details: vec![],
                        old_hash: Some(self.hasher.hash_properties(&record.properties)),
                        new_hash: None,
                    });
                }
            }
        }

        DiffResult::from_diffs(diffs)
    }

    /// Classifies one node against its record.
    fn compute_node_diff(&self, node: &ResourceNode, record: Option<&ResourceRecord>) -> ResourceDiff {
        let new_hash = Some(self.hasher.hash_properties(&node.properties));

        let Some(record) = record else {
            debug!("Resource {} needs to be created", node.id);
            return ResourceDiff {
                id: node.id.clone(),
                kind: node.kind,
                diff_type: DiffType::Create,
                reason: String::from("Not yet applied"),
                details: vec![],
                old_hash: None,
                new_hash,
            };
        };

        let old_hash = Some(self.hasher.hash_properties(&record.properties));
        let mut details = Vec::new();

        if record.kind != node.kind {
            details.push(DiffDetail {
                field: String::from("kind"),
                old_value: Some(record.kind.to_string()),
                new_value: Some(node.kind.to_string()),
            });
        }
        details.extend(property_details(&record.properties, &node.properties));
        details.extend(wiring_details(&record.wiring, &node.wiring));

        if details.is_empty() {
            debug!("Resource {} is up to date", node.id);
            ResourceDiff {
                id: node.id.clone(),
                kind: node.kind,
                diff_type: DiffType::NoChange,
                reason: String::from("Unchanged"),
                details,
                old_hash,
                new_hash,
            }
        } else {
            debug!("Resource {} needs update ({} fields)", node.id, details.len());
            let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
            ResourceDiff {
                id: node.id.clone(),
                kind: node.kind,
                diff_type: DiffType::Update,
                reason: format!("Changed: {}", fields.join(", ")),
                details,
                old_hash,
                new_hash,
            }
        }
    }
}

/// Lists added, removed and changed keys between two property bags.
fn property_details(old: &PropertyBag, new: &PropertyBag) -> Vec<DiffDetail> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let before = old.get(key);
            let after = new.get(key);
            if before == after {
                return None;
            }
            Some(DiffDetail {
                field: format!("properties.{key}"),
                old_value: before.map(ToString::to_string),
                new_value: after.map(ToString::to_string),
            })
        })
        .collect()
}

/// Lists added, removed and retargeted wires, keyed by wired property.
fn wiring_details(old: &[Wire], new: &[Wire]) -> Vec<DiffDetail> {
    let target = |w: &Wire| format!("{}.{}", w.source, w.output);
    let before: BTreeMap<&str, String> = old.iter().map(|w| (w.property.as_str(), target(w))).collect();
    let after: BTreeMap<&str, String> = new.iter().map(|w| (w.property.as_str(), target(w))).collect();
    let properties: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    properties
        .into_iter()
        .filter_map(|property| {
            let old_value = before.get(property).cloned();
            let new_value = after.get(property).cloned();
            (old_value != new_value).then(|| DiffDetail {
                field: format!("wiring.{property}"),
                old_value,
                new_value,
            })
        })
        .collect()
}

impl DiffResult {
    /// Builds a result and its summary counts.
    fn from_diffs(diffs: Vec<ResourceDiff>) -> Self {
        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();

        Self {
            creates: count(DiffType::Create),
            updates: count(DiffType::Update),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        }
    }

    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.deletes > 0
    }

    /// Gets the diff for a resource.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.id == id)
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.diff_type)?;
        if !self.details.is_empty() {
            let fields: Vec<&str> = self.details.iter().map(|d| d.field.as_str()).collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceDecl;
    use crate::graph::GraphBuilder;
    use crate::provider::ProviderHandle;
    use serde_json::json;

    fn graph(decls: &[ResourceDecl]) -> ResourceGraph {
        GraphBuilder::new().build(decls).expect("graph")
    }

    fn applied(graph: &ResourceGraph) -> Snapshot {
        let mut snapshot = Snapshot::new("demo", "dev");
        for node in graph.nodes() {
            snapshot.record(node, ProviderHandle::new(format!("{}-1", node.id)));
        }
        snapshot
    }

    #[test]
    fn test_everything_is_created_without_snapshot() {
        let g = graph(&[
            ResourceDecl::new("net", ResourceKind::Network),
            ResourceDecl::new("db", ResourceKind::Database).depends_on("net"),
        ]);
        let result = DiffEngine::new().compute_diff(&g, None);

        assert_eq!(result.creates, 2);
        assert!(result.diffs.iter().all(|d| d.diff_type == DiffType::Create));
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let written: PropertyBag =
            serde_json::from_str(r#"{"engine": "aurora-mysql", "scaling": {"min": 8, "max": 32}}"#)
                .expect("json");
        let reordered: PropertyBag =
            serde_json::from_str(r#"{"scaling": {"max": 32, "min": 8}, "engine": "aurora-mysql"}"#)
                .expect("json");

        let mut before = ResourceDecl::new("db", ResourceKind::Database);
        before.properties = written;
        let mut after = ResourceDecl::new("db", ResourceKind::Database);
        after.properties = reordered;

        let snapshot = applied(&graph(&[before]));
        let result = DiffEngine::new().compute_diff(&graph(&[after]), Some(&snapshot));

        assert_eq!(result.unchanged, 1);
        assert!(!result.has_changes());
    }

    #[test]
    fn test_changed_value_is_update_with_details() {
        let before = ResourceDecl::new("svc", ResourceKind::Service)
            .property("desired_count", json!(2))
            .property("image", json!("app:1"));
        let after = ResourceDecl::new("svc", ResourceKind::Service)
            .property("desired_count", json!(3))
            .property("port", json!(80));

        let snapshot = applied(&graph(&[before]));
        let result = DiffEngine::new().compute_diff(&graph(&[after]), Some(&snapshot));
        let diff = result.get("svc").expect("svc diff");

        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(
            diff.details,
            vec![
                DiffDetail {
                    field: String::from("properties.desired_count"),
                    old_value: Some(String::from("2")),
                    new_value: Some(String::from("3")),
                },
                DiffDetail {
                    field: String::from("properties.image"),
                    old_value: Some(String::from("\"app:1\"")),
                    new_value: None,
                },
                DiffDetail {
                    field: String::from("properties.port"),
                    old_value: None,
                    new_value: Some(String::from("80")),
                },
            ]
        );
    }

    #[test]
    fn test_kind_change_is_update() {
        let snapshot = applied(&graph(&[ResourceDecl::new("x", ResourceKind::Cluster)]));
        let result = DiffEngine::new()
            .compute_diff(&graph(&[ResourceDecl::new("x", ResourceKind::Service)]), Some(&snapshot));

        assert_eq!(result.get("x").map(|d| d.diff_type), Some(DiffType::Update));
        assert_eq!(result.get("x").map(|d| d.details[0].field.as_str()), Some("kind"));
    }

    #[test]
    fn test_removed_resource_is_delete() {
        let snapshot = applied(&graph(&[
            ResourceDecl::new("net", ResourceKind::Network),
            ResourceDecl::new("old", ResourceKind::Role),
        ]));
        let result = DiffEngine::new()
            .compute_diff(&graph(&[ResourceDecl::new("net", ResourceKind::Network)]), Some(&snapshot));

        assert_eq!(result.deletes, 1);
        assert_eq!(result.unchanged, 1);
        let delete = result.get("old").expect("delete diff");
        assert_eq!(delete.kind, ResourceKind::Role);
        assert!(delete.new_hash.is_none());
    }

    #[test]
    fn test_wired_dependent_of_changed_source_is_update() {
        let decls = |port: i64| {
            vec![
                ResourceDecl::new("db", ResourceKind::Database).property("port", json!(port)),
                ResourceDecl::new("task", ResourceKind::TaskDefinition)
                    .wire("rds_hostname", "db", "endpoint"),
                ResourceDecl::new("svc", ResourceKind::Service).depends_on("task"),
            ]
        };

        let snapshot = applied(&graph(&decls(3306)));
        let result = DiffEngine::new().compute_diff(&graph(&decls(3307)), Some(&snapshot));

        assert_eq!(result.get("db").map(|d| d.diff_type), Some(DiffType::Update));
        let task = result.get("task").expect("task diff");
        assert_eq!(task.diff_type, DiffType::Update);
        assert_eq!(task.details[0].field, "wiring.rds_hostname");
        // Plain dependencies without wiring do not propagate.
        assert_eq!(result.get("svc").map(|d| d.diff_type), Some(DiffType::NoChange));
    }

    #[test]
    fn test_wiring_only_changes_are_updates() {
        let base = || {
            vec![
                ResourceDecl::new("db", ResourceKind::Database),
                ResourceDecl::new("task", ResourceKind::TaskDefinition).depends_on("db"),
            ]
        };
        let snapshot = applied(&graph(&base()));

        // Added wire.
        let mut added = base();
        added[1] = ResourceDecl::new("task", ResourceKind::TaskDefinition)
            .wire("rds_hostname", "db", "endpoint");
        let result = DiffEngine::new().compute_diff(&graph(&added), Some(&snapshot));
        let task = result.get("task").expect("task diff");
        assert_eq!(task.diff_type, DiffType::Update);
        assert_eq!(task.details[0].field, "wiring.rds_hostname");
        assert_eq!(task.details[0].old_value, None);
        assert_eq!(task.details[0].new_value.as_deref(), Some("db.endpoint"));
        assert_eq!(result.get("db").map(|d| d.diff_type), Some(DiffType::NoChange));

        // Retargeted wire.
        let wired = applied(&graph(&added));
        let mut retargeted = base();
        retargeted[1] = ResourceDecl::new("task", ResourceKind::TaskDefinition)
            .wire("rds_hostname", "db", "port");
        let result = DiffEngine::new().compute_diff(&graph(&retargeted), Some(&wired));
        let task = result.get("task").expect("task diff");
        assert_eq!(task.diff_type, DiffType::Update);
        assert_eq!(task.details[0].old_value.as_deref(), Some("db.endpoint"));
        assert_eq!(task.details[0].new_value.as_deref(), Some("db.port"));

        // Removed wire.
        let result = DiffEngine::new().compute_diff(&graph(&base()), Some(&wired));
        let task = result.get("task").expect("task diff");
        assert_eq!(task.diff_type, DiffType::Update);
        assert_eq!(task.details[0].new_value, None);

        // Same wiring again is no change.
        let result = DiffEngine::new().compute_diff(&graph(&added), Some(&wired));
        assert!(!result.has_changes());
    }

    #[test]
    fn test_diffs_follow_declaration_order() {
        let g = graph(&[
            ResourceDecl::new("svc", ResourceKind::Service).depends_on("net"),
            ResourceDecl::new("net", ResourceKind::Network),
        ]);
        let result = DiffEngine::new().compute_diff(&g, None);
        let ids: Vec<&str> = result.diffs.iter().map(|d| d.id.as_str()).collect();

        assert_eq!(ids, vec!["svc", "net"]);
    }
}
