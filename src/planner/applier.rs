//! Plan applier.
//!
//! Executes plan steps strictly in order against a provider. The first failed
//! step halts the run; every later step is reported as skipped. Nothing is
//! rolled back: the snapshot keeps exactly what succeeded, so re-running the
//! same topology resumes where the failed run stopped.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::error::{ApplyError, ProviderError};
use crate::graph::ResourceNode;
use crate::provider::{Provider, ProviderHandle};
use crate::state::{HistoryEntry, RunOperation, Snapshot};

use super::plan::{ActionType, PlanStep, ProvisioningPlan};

/// Applier for provisioning plans.
pub struct PlanApplier<'a> {
    /// Provider the steps run against.
    provider: &'a dyn Provider,
    /// Operation recorded in the history entry.
    operation: RunOperation,
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    /// The step completed.
    Success,
    /// The provider call failed.
    Failed,
    /// The step never ran because an earlier step failed.
    Skipped,
}

/// Result of applying a single step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    /// Step ordinal.
    pub ordinal: usize,
    /// Resource identifier.
    pub resource_id: String,
    /// Attempted action.
    pub action: ActionType,
    /// Outcome.
    pub outcome: StepOutcome,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Resulting handle (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<ProviderHandle>,
}

/// Result of applying the entire plan.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// Per-step results in plan order.
    pub results: Vec<StepResult>,
    /// Number of successful steps.
    pub succeeded: usize,
    /// Number of failed steps.
    pub failed: usize,
    /// Number of skipped steps.
    pub skipped: usize,
    /// Whether every step succeeded.
    pub success: bool,
}

impl std::fmt::Debug for PlanApplier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanApplier")
            .field("provider", &self.provider.provider_type())
            .field("operation", &self.operation)
            .finish()
    }
}

impl<'a> PlanApplier<'a> {
    /// Creates a new plan applier.
    #[must_use]
    pub fn new(provider: &'a dyn Provider) -> Self {
        Self {
            provider,
            operation: RunOperation::Apply,
        }
    }

    /// Sets the operation recorded in history.
    #[must_use]
    pub const fn with_operation(mut self, operation: RunOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Applies a plan, updating `snapshot` as steps succeed.
    ///
    /// A failed step is not an error here; it is reported in the returned
    /// [`ApplyReport`].
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Aborted`] if the plan fails its guardrails. No
    /// provider call is made in that case.
    pub async fn apply(
        &self,
        plan: &ProvisioningPlan,
        snapshot: &mut Snapshot,
    ) -> Result<ApplyReport, ApplyError> {
        if !plan.passes_guardrails {
            error!("Plan does not pass guardrails");
            for violation in &plan.guardrail_violations {
                error!("  - {violation}");
            }
            return Err(ApplyError::Aborted {
                reason: format!(
                    "Plan violates guardrails: {}",
                    plan.guardrail_violations.join("; ")
                ),
            });
        }

        info!("Applying plan with {} steps", plan.steps.len());

        let mut handles = snapshot.handles();
        let mut results = Vec::with_capacity(plan.steps.len());
        let mut halted = false;

        for step in &plan.steps {
            if halted {
                warn!("Skipping step {}: {}", step.ordinal, step.description());
                results.push(StepResult {
                    ordinal: step.ordinal,
                    resource_id: step.resource_id.clone(),
                    action: step.action,
                    outcome: StepOutcome::Skipped,
                    error: None,
                    handle: None,
                });
                continue;
            }

            let result = self.apply_step(step, snapshot, &mut handles).await;
            halted = result.outcome == StepOutcome::Failed;
            results.push(result);
        }

        let report = ApplyReport::from_results(results);

        let touched: Vec<String> = report
            .results
            .iter()
            .filter(|r| r.outcome == StepOutcome::Success && r.action != ActionType::NoOp)
            .map(|r| r.resource_id.clone())
            .collect();

        let history_entry = if report.success {
            snapshot.topology_hash.clone_from(&plan.topology_hash);
            HistoryEntry::new(self.operation, &plan.topology_hash, touched)
        } else {
            let message = report
                .results
                .iter()
                .find_map(|r| r.error.as_deref())
                .unwrap_or("step failed");
            HistoryEntry::failed(self.operation, &plan.topology_hash, touched, message)
        };
        snapshot.add_history(history_entry);

        info!("{report}");
        Ok(report)
    }

    /// Applies a single step.
    async fn apply_step(
        &self,
        step: &PlanStep,
        snapshot: &mut Snapshot,
        handles: &mut BTreeMap<String, ProviderHandle>,
    ) -> StepResult {
        info!("Applying step {}: {}", step.ordinal, step.description());

        let outcome = match step.action {
            ActionType::NoOp => {
                snapshot.refresh_dependencies(&step.node);
                Ok(step.prior_handle.clone())
            }
            ActionType::Create => self.apply_create(step, snapshot, handles).await.map(Some),
            ActionType::Update => self.apply_update(step, snapshot, handles).await.map(Some),
            ActionType::Delete => self.apply_delete(step, snapshot, handles).await.map(|()| None),
        };

        match outcome {
            Ok(handle) => StepResult {
                ordinal: step.ordinal,
                resource_id: step.resource_id.clone(),
                action: step.action,
                outcome: StepOutcome::Success,
                error: None,
                handle,
            },
            Err(e) => {
                if e.is_retryable() {
                    error!(
                        "Failed to {} {}: {e} (transient, re-run to resume)",
                        step.action, step.resource_id
                    );
                } else {
                    error!("Failed to {} {}: {e}", step.action, step.resource_id);
                }
                StepResult {
                    ordinal: step.ordinal,
                    resource_id: step.resource_id.clone(),
                    action: step.action,
                    outcome: StepOutcome::Failed,
                    error: Some(e.to_string()),
                    handle: None,
                }
            }
        }
    }

    /// Creates a resource.
    async fn apply_create(
        &self,
        step: &PlanStep,
        snapshot: &mut Snapshot,
        handles: &mut BTreeMap<String, ProviderHandle>,
    ) -> Result<ProviderHandle, ProviderError> {
        let node = resolve_wiring(&step.node, handles)?;
        let handle = self.provider.create(&node).await?;

        info!("Created {} ({})", step.resource_id, handle.id);
        snapshot.record(&step.node, handle.clone());
        handles.insert(step.resource_id.clone(), handle.clone());
        Ok(handle)
    }

    /// Updates a resource in place.
    async fn apply_update(
        &self,
        step: &PlanStep,
        snapshot: &mut Snapshot,
        handles: &mut BTreeMap<String, ProviderHandle>,
    ) -> Result<ProviderHandle, ProviderError> {
        let Some(prior) = &step.prior_handle else {
            return Err(ProviderError::rejected(format!(
                "No recorded handle for '{}'",
                step.resource_id
            )));
        };

        let node = resolve_wiring(&step.node, handles)?;
        let handle = self.provider.update(&node, prior).await?;

        info!("Updated {} ({})", step.resource_id, handle.id);
        snapshot.record(&step.node, handle.clone());
        handles.insert(step.resource_id.clone(), handle.clone());
        Ok(handle)
    }

    /// Deletes a resource. A resource the provider no longer knows is gone.
    async fn apply_delete(
        &self,
        step: &PlanStep,
        snapshot: &mut Snapshot,
        handles: &mut BTreeMap<String, ProviderHandle>,
    ) -> Result<(), ProviderError> {
        if let Some(prior) = &step.prior_handle {
            match self.provider.delete(&step.node, prior).await {
                Ok(()) => info!("Deleted {} ({})", step.resource_id, prior.id),
                Err(ProviderError::NotFound { .. }) => {
                    info!("{} was already deleted", step.resource_id);
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!("No handle recorded for {}, considering delete successful", step.resource_id);
        }

        snapshot.remove(&step.resource_id);
        handles.remove(&step.resource_id);
        Ok(())
    }
}

/// Returns a copy of `node` with every wired property filled in.
fn resolve_wiring(
    node: &ResourceNode,
    handles: &BTreeMap<String, ProviderHandle>,
) -> Result<ResourceNode, ProviderError> {
    let mut resolved = node.clone();

    for wire in &node.wiring {
        let value = handles
            .get(&wire.source)
            .and_then(|h| h.output(&wire.output))
            .ok_or_else(|| ProviderError::MissingOutput {
                source_id: wire.source.clone(),
                output: wire.output.clone(),
            })?;

        debug!("Wiring {}.{} <- {}.{}", node.id, wire.property, wire.source, wire.output);
        resolved
            .properties
            .insert(wire.property.clone(), serde_json::Value::String(value.to_string()));
    }

    Ok(resolved)
}

impl ApplyReport {
    /// Builds a report and its summary counts.
    fn from_results(results: Vec<StepResult>) -> Self {
        let count = |o: StepOutcome| results.iter().filter(|r| r.outcome == o).count();
        let failed = count(StepOutcome::Failed);

        Self {
            succeeded: count(StepOutcome::Success),
            failed,
            skipped: count(StepOutcome::Skipped),
            success: failed == 0,
            results,
        }
    }

    /// Returns the first failed step.
    #[must_use]
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.results.iter().find(|r| r.outcome == StepOutcome::Failed)
    }

    /// Converts a failed report into an [`ApplyError`].
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::StepFailed`] if any step failed.
    pub fn into_result(self) -> Result<Self, ApplyError> {
        match self.failed_step() {
            Some(step) => Err(ApplyError::StepFailed {
                resource: step.resource_id.clone(),
                action: step.action.to_string(),
                message: step.error.clone().unwrap_or_default(),
                skipped: self.skipped,
            }),
            None => Ok(self),
        }
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Applied {} steps: {} succeeded, {} failed, {} skipped",
            self.results.len(),
            self.succeeded,
            self.failed,
            self.skipped
        )
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}
