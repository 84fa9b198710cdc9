//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::graph::ResourceGraph;
use crate::planner::{ActionType, ApplyReport, ProvisioningPlan, StepOutcome};
use crate::state::{LockInfo, Snapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "#")]
    ordinal: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Apply result row for table display.
#[derive(Tabled)]
struct StepResultRow {
    #[tabled(rename = "#")]
    ordinal: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Handle")]
    handle: String,
}

/// Graph node row for table display.
#[derive(Tabled)]
struct GraphNodeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
    #[tabled(rename = "Wiring")]
    wiring: String,
}

/// Snapshot record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Handle")]
    handle: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats a provisioning plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ProvisioningPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &ProvisioningPlan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();

        let _ = write!(output, "\nProvisioning Plan\n");
        let _ = write!(output, "   Topology hash: {}\n\n", short(&plan.topology_hash));

        let rows: Vec<PlanStepRow> = plan
            .steps
            .iter()
            .filter(|s| detailed || s.action != ActionType::NoOp)
            .map(|s| PlanStepRow {
                ordinal: s.ordinal,
                action: Self::format_action_type(s.action),
                resource: s.resource_id.clone(),
                kind: s.kind.to_string(),
                reason: Self::truncate(&s.reason, 40),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for step in plan.steps.iter().filter(|s| !s.details.is_empty()) {
                let _ = writeln!(output, "\n   {} {}:", Self::format_action_type(step.action), step.resource_id);
                for detail in &step.details {
                    let _ = writeln!(
                        output,
                        "     {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("(none)").red(),
                        detail.new_value.as_deref().unwrap_or("(none)").green()
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.delete_count().to_string().red()
        );

        if !plan.passes_guardrails {
            let _ = write!(output, "\n{} Guardrail violations:\n", "⚠".yellow());
            for violation in &plan.guardrail_violations {
                let _ = writeln!(output, "   - {violation}");
            }
        }

        output
    }

    /// Formats an apply report.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let rows: Vec<StepResultRow> = report
                    .results
                    .iter()
                    .filter(|r| r.action != ActionType::NoOp)
                    .map(|r| StepResultRow {
                        ordinal: r.ordinal,
                        action: Self::format_action_type(r.action),
                        resource: r.resource_id.clone(),
                        outcome: Self::format_outcome(r.outcome),
                        handle: r.handle.as_ref().map(|h| h.id.clone()).unwrap_or_default(),
                    })
                    .collect();

                let mut output = String::from("\n");
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');

                if let Some(failed) = report.failed_step() {
                    let _ = write!(
                        output,
                        "\n{} Failed to {} {}: {}\n",
                        "✗".red(),
                        failed.action,
                        failed.resource_id,
                        failed.error.as_deref().unwrap_or("unknown error")
                    );
                    let _ = writeln!(
                        output,
                        "   {} later steps skipped. Re-run apply to resume.",
                        report.skipped
                    );
                } else {
                    let _ = write!(output, "\n{} {report}\n", "✓".green());
                }

                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let errors: Vec<serde_json::Value> = result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect();
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": errors,
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();

                if result.is_valid() {
                    let _ = writeln!(output, "{} Topology is valid", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Topology has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                    }
                }

                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(
                        output,
                        "{} {} warning(s):",
                        "⚠".yellow(),
                        result.warning_count()
                    );
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                output
            }
        }
    }

    /// Formats a resource graph in dependency order.
    #[must_use]
    pub fn format_graph(&self, graph: &ResourceGraph) -> String {
        match self.format {
            OutputFormat::Json => {
                let nodes: Vec<_> = graph.dependency_order().collect();
                serde_json::to_string_pretty(&nodes).unwrap_or_default()
            }
            OutputFormat::Text => {
                let rows: Vec<GraphNodeRow> = graph
                    .dependency_order()
                    .enumerate()
                    .map(|(i, node)| GraphNodeRow {
                        index: i + 1,
                        resource: node.id.clone(),
                        kind: node.kind.to_string(),
                        depends_on: node.dependencies.join(", "),
                        wiring: node
                            .wiring
                            .iter()
                            .map(|w| format!("{} <- {}.{}", w.property, w.source, w.output))
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                let _ = write!(
                    output,
                    "\n\n{} resources, {} edges\n",
                    graph.len(),
                    graph.edge_count()
                );
                output
            }
        }
    }

    /// Formats a snapshot.
    #[must_use]
    pub fn format_snapshot(&self, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(
                    output,
                    "\nSnapshot: {}/{}\n\n",
                    snapshot.project, snapshot.environment
                );
                let _ = writeln!(output, "   Version: {}", snapshot.version);
                let _ = writeln!(output, "   Topology hash: {}", short(&snapshot.topology_hash));
                let _ = writeln!(output, "   Last updated: {}", snapshot.last_updated);
                let _ = writeln!(output, "   Resources: {}", snapshot.len());

                if !snapshot.is_empty() {
                    let rows: Vec<RecordRow> = snapshot
                        .resources
                        .values()
                        .map(|r| RecordRow {
                            resource: r.id.clone(),
                            kind: r.kind.to_string(),
                            handle: r.handle.id.clone(),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !snapshot.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", snapshot.history.len());
                    for entry in snapshot.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a lock record.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(lock).unwrap_or_default(),
            OutputFormat::Text => format!(
                "{} Snapshot locked: {} (holder {}, expires in {}s)\n",
                "✓".green(),
                lock.lock_id,
                lock.holder,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::NoOp => "noop".dimmed().to_string(),
        }
    }

    /// Formats a step outcome with color.
    fn format_outcome(outcome: StepOutcome) -> String {
        match outcome {
            StepOutcome::Success => "success".green().to_string(),
            StepOutcome::Failed => "failed".red().to_string(),
            StepOutcome::Skipped => "skipped".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, glyph: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{glyph} {message}"),
        }
    }
}

/// First eight characters of a hash.
fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceDecl;
    use crate::graph::{GraphBuilder, ResourceKind};
    use crate::planner::{DiffEngine, PlanSynthesizer};

    fn plan() -> ProvisioningPlan {
        let decls = vec![
            ResourceDecl::new("net", ResourceKind::Network),
            ResourceDecl::new("db", ResourceKind::Database).depends_on("net"),
        ];
        let graph = GraphBuilder::new().build(&decls).expect("graph");
        let diff = DiffEngine::new().compute_diff(&graph, None);
        PlanSynthesizer::new()
            .synthesize(&graph, &diff, None, "0123456789abcdef")
            .expect("plan")
    }

    #[test]
    fn test_plan_text_lists_steps() {
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), false);

        assert!(text.contains("01234567"));
        assert!(text.contains("create"));
        assert!(text.contains("net"));
        assert!(text.contains("db"));
    }

    #[test]
    fn test_plan_json_is_parseable() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(), false);
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");

        assert_eq!(value["steps"][0]["resource_id"], "net");
        assert_eq!(value["steps"][1]["action"], "create");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a long reason text", 10), "a long ...");
    }

    #[test]
    fn test_short_hash_of_short_input() {
        assert_eq!(short("abc"), "abc");
        assert_eq!(short("0123456789"), "01234567");
    }
}
