//! Configuration validation for topology files.
//!
//! This module checks a parsed topology before any graph is built: naming,
//! backend and provider settings, references, wiring and a few kind-specific
//! property rules. All problems are collected; the first error is returned.

use crate::error::{ConfigError, Result};
use crate::graph::ResourceKind;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    GuardrailsConfig, ProjectConfig, ProviderConfig, ProviderType, ResourceDecl, StateBackend,
    StateConfig, TopologyConfig,
};

/// Managed policy name suffix treated as overly broad.
const BROAD_POLICY_SUFFIX: &str = "FullAccess";

/// Validator for topology configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a topology configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &TopologyConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ConfigError::validation(first_error.message.clone(), first_error.field.clone()).into())
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &TopologyConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_resources(config, &mut result);
        if let Some(guardrails) = &config.guardrails {
            Self::validate_guardrails(guardrails, config, &mut result);
        }

        result
    }

    /// Validates project configuration.
    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket: Ignored by the local backend"));
                }
            }
        }
    }

    /// Validates provider configuration.
    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        if provider.provider_type == ProviderType::Http {
            match provider.endpoint.as_deref() {
                None | Some("") => {
                    result.error(
                        "provider.endpoint",
                        "An endpoint is required when using the http provider",
                    );
                }
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    result.error(
                        "provider.endpoint",
                        format!("Endpoint '{url}' must start with http:// or https://"),
                    );
                }
                Some(_) => {}
            }
        }

        if provider.timeout_secs == Some(0) {
            result.error("provider.timeout_secs", "Timeout must be at least 1 second");
        }
    }

    /// Validates all resource declarations.
    fn validate_resources(config: &TopologyConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in topology"));
            return;
        }

        let ids: HashSet<&str> = config.resources.iter().map(|r| r.id.as_str()).collect();
        let forbid_broad = config
            .guardrails
            .as_ref()
            .is_some_and(|g| g.forbid_broad_policies);
        let mut seen_ids = HashSet::new();

        for (i, resource) in config.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !seen_ids.insert(resource.id.as_str()) {
                result.error(
                    format!("{prefix}.id"),
                    format!("Duplicate resource id: {}", resource.id),
                );
            }

            if !is_valid_id(&resource.id) {
                result.error(
                    format!("{prefix}.id"),
                    format!(
                        "Resource id '{}' is invalid. Must start with a letter and contain only lowercase alphanumerics, hyphens or underscores.",
                        resource.id
                    ),
                );
            }

            Self::validate_references(resource, &prefix, &ids, result);
            Self::validate_wiring(resource, &prefix, &ids, result);
            Self::validate_kind_properties(resource, &prefix, forbid_broad, result);
        }
    }

    /// Validates declared dependencies.
    fn validate_references(
        resource: &ResourceDecl,
        prefix: &str,
        ids: &HashSet<&str>,
        result: &mut ValidationResult,
    ) {
        let mut seen = HashSet::new();

        for (i, dep) in resource.depends_on.iter().enumerate() {
            let field = format!("{prefix}.depends_on[{i}]");

            if dep == &resource.id {
                result.error(field, format!("Resource '{dep}' cannot depend on itself"));
            } else if !ids.contains(dep.as_str()) {
                result.error(field, format!("Unknown resource '{dep}'"));
            } else if !seen.insert(dep) {
                result.warnings.push(format!(
                    "{field}: Dependency '{dep}' is listed more than once"
                ));
            }
        }
    }

    /// Validates wiring entries.
    fn validate_wiring(
        resource: &ResourceDecl,
        prefix: &str,
        ids: &HashSet<&str>,
        result: &mut ValidationResult,
    ) {
        let mut wired = HashSet::new();

        for (i, wire) in resource.wiring.iter().enumerate() {
            let field = format!("{prefix}.wiring[{i}]");

            if wire.property.is_empty() || wire.output.is_empty() {
                result.error(
                    field.clone(),
                    "Wiring entries need both a property and an output",
                );
            }

            if wire.source == resource.id {
                result.error(
                    format!("{field}.from"),
                    format!("Resource '{}' cannot wire its own outputs", resource.id),
                );
            } else if !ids.contains(wire.source.as_str()) {
                result.error(
                    format!("{field}.from"),
                    format!("Unknown resource '{}'", wire.source),
                );
            }

            if !wired.insert(wire.property.as_str()) {
                result.error(
                    format!("{field}.property"),
                    format!("Property '{}' is wired more than once", wire.property),
                );
            }

            if resource.properties.contains_key(&wire.property) {
                result.warnings.push(format!(
                    "{field}.property: Declared value of '{}' is replaced by the wired output",
                    wire.property
                ));
            }
        }
    }

    /// Validates properties that only make sense for some kinds.
    fn validate_kind_properties(
        resource: &ResourceDecl,
        prefix: &str,
        forbid_broad: bool,
        result: &mut ValidationResult,
    ) {
        let props = &resource.properties;

        match resource.kind {
            ResourceKind::Database | ResourceKind::ScalingPolicy => {
                let min = props.get("min_capacity").and_then(serde_json::Value::as_f64);
                let max = props.get("max_capacity").and_then(serde_json::Value::as_f64);
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        result.error(
                            format!("{prefix}.properties.min_capacity"),
                            format!("min_capacity ({min}) exceeds max_capacity ({max})"),
                        );
                    }
                }

                if let Some(target) = props
                    .get("target_cpu_percent")
                    .and_then(serde_json::Value::as_f64)
                {
                    if !(target > 0.0 && target <= 100.0) {
                        result.error(
                            format!("{prefix}.properties.target_cpu_percent"),
                            "Target CPU utilization must be between 1 and 100",
                        );
                    }
                }
            }
            ResourceKind::LoadBalancer => {
                if let Some(path) = props
                    .get("health_check_path")
                    .and_then(serde_json::Value::as_str)
                {
                    if !path.starts_with('/') {
                        result.error(
                            format!("{prefix}.properties.health_check_path"),
                            format!("Health check path must be absolute: {path}"),
                        );
                    }
                }
            }
            ResourceKind::TaskDefinition => {
                for key in ["memory_mib", "cpu"] {
                    if let Some(value) = props.get(key) {
                        if value.as_u64().is_none_or(|v| v == 0) {
                            result.error(
                                format!("{prefix}.properties.{key}"),
                                format!("{key} must be a positive integer"),
                            );
                        }
                    }
                }
            }
            ResourceKind::Role => {
                let policies = props
                    .get("managed_policies")
                    .and_then(serde_json::Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();

                for policy in policies.iter().filter_map(serde_json::Value::as_str) {
                    if policy.ends_with(BROAD_POLICY_SUFFIX) {
                        let field = format!("{prefix}.properties.managed_policies");
                        let message = format!(
                            "Role '{}' attaches broad managed policy '{policy}'",
                            resource.id
                        );
                        if forbid_broad {
                            result.error(field, message);
                        } else {
                            result.warnings.push(format!("{field}: {message}"));
                        }
                    }
                }
            }
            ResourceKind::Network | ResourceKind::Cluster | ResourceKind::Service => {}
        }
    }

    /// Validates guardrails configuration.
    fn validate_guardrails(
        guardrails: &GuardrailsConfig,
        config: &TopologyConfig,
        result: &mut ValidationResult,
    ) {
        for (i, id) in guardrails.prevent_destroy.iter().enumerate() {
            if config.resource(id).is_none() {
                result.warnings.push(format!(
                    "guardrails.prevent_destroy[{i}]: '{id}' is not declared in the topology"
                ));
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Validates a resource identifier. Same as a name, underscores allowed.
fn is_valid_id(id: &str) -> bool {
    is_valid_name(&id.replace('_', "-"))
}

impl ValidationResult {
    /// Records an error.
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
