//! Planning module for provisioning operations.
//!
//! This module compares the desired graph with the last-applied snapshot,
//! orders the resulting actions into a plan and applies that plan against a
//! provider.

mod applier;
mod diff;
mod plan;

pub use applier::{ApplyReport, PlanApplier, StepOutcome, StepResult};
pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use plan::{ActionType, PlanStep, PlanSynthesizer, ProvisioningPlan};
