//! Provisioning plan types and synthesis.
//!
//! The synthesizer orders the graph with Kahn's algorithm, breaking ties by
//! declaration order, and attaches each node's diff classification. Deletions
//! follow in reverse dependency order, computed from the dependencies recorded
//! in the snapshot since deleted resources are no longer in the graph.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use tracing::{debug, warn};

use crate::config::GuardrailsConfig;
use crate::error::PlanError;
use crate::graph::{ResourceGraph, ResourceKind, ResourceNode};
use crate::provider::ProviderHandle;
use crate::state::Snapshot;

use super::diff::{DiffDetail, DiffResult, DiffType, ResourceDiff};

/// An ordered provisioning plan.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Topology hash this plan is based on.
    pub topology_hash: String,
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
    /// Whether the plan passes guardrails.
    pub passes_guardrails: bool,
    /// Guardrail violations (if any).
    pub guardrail_violations: Vec<String>,
}

/// A single plan step.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    /// 1-based position in the plan.
    pub ordinal: usize,
    /// Resource identifier.
    pub resource_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Action to take.
    pub action: ActionType,
    /// Reason for this action.
    pub reason: String,
    /// Field-level changes (updates only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<DiffDetail>,
    /// Node to apply (the recorded node for deletes).
    #[serde(skip)]
    pub node: ResourceNode,
    /// Handle from the last apply, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_handle: Option<ProviderHandle>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// No operation.
    NoOp,
}

/// Builds provisioning plans from a graph and its diff.
#[derive(Debug, Default)]
pub struct PlanSynthesizer {
    /// Guardrails checked against every plan.
    guardrails: Option<GuardrailsConfig>,
}

impl PlanSynthesizer {
    /// Creates a synthesizer without guardrails.
    #[must_use]
    pub const fn new() -> Self {
        Self { guardrails: None }
    }

    /// Sets the guardrails.
    #[must_use]
    pub fn with_guardrails(mut self, guardrails: Option<GuardrailsConfig>) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Synthesizes a plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnsatisfiableOrder`] if no total order exists and
    /// [`PlanError::MissingDiff`] if the diff does not cover a graph node.
    pub fn synthesize(
        &self,
        graph: &ResourceGraph,
        diff: &DiffResult,
        snapshot: Option<&Snapshot>,
        topology_hash: &str,
    ) -> Result<ProvisioningPlan, PlanError> {
        let diffs: HashMap<&str, &ResourceDiff> =
            diff.diffs.iter().map(|d| (d.id.as_str(), d)).collect();
        let prior = |id: &str| snapshot.and_then(|s| s.get(id)).map(|r| r.handle.clone());

        let mut steps = Vec::with_capacity(diff.diffs.len());

        for node in topological_order(graph)? {
            let Some(node_diff) = diffs.get(node.id.as_str()) else {
                return Err(PlanError::MissingDiff {
                    id: node.id.clone(),
                });
            };

            let action = match node_diff.diff_type {
                DiffType::Create => ActionType::Create,
                DiffType::Update => ActionType::Update,
                DiffType::NoChange => ActionType::NoOp,
                DiffType::Delete => {
                    return Err(PlanError::MissingDiff {
                        id: node.id.clone(),
                    });
                }
            };

            steps.push(PlanStep {
                ordinal: steps.len() + 1,
                resource_id: node.id.clone(),
                kind: node.kind,
                action,
                reason: node_diff.reason.clone(),
                details: node_diff.details.clone(),
                node: node.clone(),
                prior_handle: prior(&node.id),
            });
        }

        let deleted: Vec<&ResourceDiff> = diff
            .diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Delete)
            .collect();

        for id in delete_order(&deleted, snapshot)? {
            let record = snapshot.and_then(|s| s.get(&id));
            let Some(record) = record else {
                return Err(PlanError::MissingDiff { id });
            };

            steps.push(PlanStep {
                ordinal: steps.len() + 1,
                resource_id: id,
                kind: record.kind,
                action: ActionType::Delete,
                reason: String::from("Removed from topology"),
                details: vec![],
                node: record.to_node(),
                prior_handle: Some(record.handle.clone()),
            });
        }

        let guardrail_violations = self.check_guardrails(&steps);
        for violation in &guardrail_violations {
            warn!("Guardrail violation: {violation}");
        }

        debug!("Synthesized plan with {} steps", steps.len());
        Ok(ProvisioningPlan {
            created_at: Utc::now(),
            topology_hash: topology_hash.to_string(),
            steps,
            passes_guardrails: guardrail_violations.is_empty(),
            guardrail_violations,
        })
    }

    /// Checks guardrails for the plan.
    fn check_guardrails(&self, steps: &[PlanStep]) -> Vec<String> {
        let Some(guardrails) = &self.guardrails else {
            return Vec::new();
        };

        let mut violations = Vec::new();
        let deletes: Vec<&PlanStep> = steps
            .iter()
            .filter(|s| s.action == ActionType::Delete)
            .collect();

        if let Some(max_deletes) = guardrails.max_deletes {
            if deletes.len() > max_deletes {
                violations.push(format!(
                    "Plan deletes {} resources but max_deletes is {max_deletes}",
                    deletes.len()
                ));
            }
        }

        for step in deletes {
            if guardrails.prevent_destroy.contains(&step.resource_id) {
                violations.push(format!(
                    "Resource '{}' is protected by prevent_destroy",
                    step.resource_id
                ));
            }
        }

        violations
    }
}

/// Orders graph nodes with Kahn's algorithm, lowest declaration index first.
fn topological_order(graph: &ResourceGraph) -> Result<Vec<&ResourceNode>, PlanError> {
    let nodes = graph.nodes();
    let mut in_degree: Vec<usize> = (0..nodes.len()).map(|i| graph.in_degree(i)).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(&nodes[idx]);
        for &dependent in graph.dependent_indices(idx) {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() == nodes.len() {
        Ok(order)
    } else {
        let remaining = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d > 0)
            .map(|(i, _)| nodes[i].id.clone())
            .collect();
        Err(PlanError::UnsatisfiableOrder { remaining })
    }
}

/// Orders deletions so dependents are removed before their dependencies.
fn delete_order(
    deleted: &[&ResourceDiff],
    snapshot: Option<&Snapshot>,
) -> Result<Vec<String>, PlanError> {
    let ids: BTreeSet<&str> = deleted.iter().map(|d| d.id.as_str()).collect();

    // Recorded dependencies restricted to the deleted set.
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for &id in &ids {
        let deps: BTreeSet<&str> = snapshot
            .and_then(|s| s.get(id))
            .map(|r| r.dependencies.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let deps: Vec<&str> = deps.into_iter().filter(|d| ids.contains(d)).collect();

        pending.insert(id, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(id);
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|&(_, &n)| n == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(ids.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for &dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() != ids.len() {
        let remaining = pending
            .into_iter()
            .filter(|&(_, n)| n > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(PlanError::UnsatisfiableOrder { remaining });
    }

    order.reverse();
    Ok(order)
}

impl ProvisioningPlan {
    /// Returns true if no step needs a provider call.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.iter().all(|s| s.action == ActionType::NoOp)
    }

    /// Returns the number of steps with the given action.
    #[must_use]
    pub fn count(&self, action: ActionType) -> usize {
        self.steps.iter().filter(|s| s.action == action).count()
    }

    /// Returns the number of create steps.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(ActionType::Create)
    }

    /// Returns the number of update steps.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(ActionType::Update)
    }

    /// Returns the number of delete steps.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(ActionType::Delete)
    }

    /// Gets the step for a resource.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.resource_id == id)
    }

    /// Returns the resource identifiers in step order.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.resource_id.as_str()).collect()
    }
}

impl PlanStep {
    /// Returns a human-readable description of the step.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            ActionType::Create => format!("Create {} '{}'", self.kind, self.resource_id),
            ActionType::Update => format!("Update {} '{}'", self.kind, self.resource_id),
            ActionType::Delete => format!("Delete {} '{}'", self.kind, self.resource_id),
            ActionType::NoOp => format!("No change for '{}'", self.resource_id),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlanStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.resource_id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ProvisioningPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Provisioning Plan ({} steps):", self.steps.len())?;
        for step in &self.steps {
            writeln!(f, "  {}. {step}", step.ordinal)?;
        }

        if !self.guardrail_violations.is_empty() {
            writeln!(f, "\nGuardrail violations:")?;
            for violation in &self.guardrail_violations {
                writeln!(f, "  - {violation}")?;
            }
        }

        Ok(())
    }
}
