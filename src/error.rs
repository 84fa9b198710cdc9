//! Error types for the stackplan topology compiler.
//!
//! Errors are grouped by the phase that raises them: configuration loading,
//! graph construction, plan synthesis, provider calls, plan application and
//! snapshot storage. Graph and plan errors abort a run before any provider is
//! contacted; provider errors halt an apply but keep its partial results.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stackplan.
#[derive(Debug, Error)]
pub enum StackplanError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Plan synthesis errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Provider errors raised outside of a plan step.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Plan application errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Snapshot storage errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Errors raised while turning declarations into a resource graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The topology contains a dependency cycle.
    #[error("Cyclic dependency detected: {}", .path.join(" -> "))]
    CyclicDependency {
        /// The cycle, starting and ending with the same identifier.
        path: Vec<String>,
    },

    /// A declaration references an identifier that does not exist.
    #[error("Resource '{resource}' references unknown resource '{reference}'")]
    UnresolvedReference {
        /// Resource holding the reference.
        resource: String,
        /// The unresolved identifier.
        reference: String,
    },

    /// Two declarations share the same identifier.
    #[error("Duplicate resource identifier: {id}")]
    DuplicateIdentifier {
        /// The duplicated identifier.
        id: String,
    },
}

/// Plan synthesis errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// No total order exists over the nodes.
    #[error("No total order exists for resources: {}", .remaining.join(", "))]
    UnsatisfiableOrder {
        /// Identifiers that could not be placed.
        remaining: Vec<String>,
    },

    /// The diff and the graph disagree about a resource.
    #[error("Diff is missing an entry for resource '{id}'")]
    MissingDiff {
        /// Identifier without a diff entry.
        id: String,
    },
}

/// Errors returned by a provider adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected the request.
    #[error("Provider rejected request: {message}")]
    Rejected {
        /// Message from the provider.
        message: String,
    },

    /// The resource does not exist on the provider.
    #[error("Resource not found on provider: {id}")]
    NotFound {
        /// Provider identifier of the missing resource.
        id: String,
    },

    /// Authentication with the provider failed.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed with a non-success status.
    #[error("Provider request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error body from the provider.
        message: String,
    },

    /// Rate limited.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A wired output was not available when the step ran.
    #[error("Output '{output}' of resource '{source_id}' is not available")]
    MissingOutput {
        /// Upstream resource identifier.
        source_id: String,
        /// Requested output name.
        output: String,
    },
}

/// Plan application errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The plan was refused before any step ran.
    #[error("Apply aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// A step failed; later steps were skipped.
    #[error("Failed to {action} '{resource}': {message} ({skipped} steps skipped)")]
    StepFailed {
        /// Resource identifier of the failed step.
        resource: String,
        /// Attempted action.
        action: String,
        /// Underlying provider message.
        message: String,
        /// Number of steps skipped after the failure.
        skipped: usize,
    },
}

/// Snapshot storage errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Snapshot is corrupted.
    #[error("Snapshot is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire snapshot lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Lock is held by another process.
    #[error("Snapshot is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// A held lock was released or replaced before the run finished.
    #[error("Snapshot lock {lock_id} is no longer held: {message}")]
    LockLost {
        /// Identifier of the lock the run held.
        lock_id: String,
        /// What was found instead.
        message: String,
    },

    /// Storage backend error.
    #[error("Snapshot backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// Serialization error.
    #[error("Snapshot serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Snapshot version mismatch.
    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected snapshot version.
        expected: String,
        /// Found snapshot version.
        found: String,
    },
}

/// Result type alias for stackplan operations.
pub type Result<T> = std::result::Result<T, StackplanError>;

impl StackplanError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is a malformed-topology error that
    /// needs correction by the author rather than a retry.
    #[must_use]
    pub const fn is_topology_error(&self) -> bool {
        matches!(self, Self::Graph(_) | Self::Plan(_) | Self::Config(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl ProviderError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true if a caller could reasonably retry the operation.
    ///
    /// Runs never retry on their own; the applier only says so in its log.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::NetworkError { .. })
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = GraphError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::network("reset").is_retryable());
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(!ProviderError::rejected("bad").is_retryable());
    }

    #[test]
    fn test_topology_errors_are_not_transient() {
        let err = StackplanError::from(GraphError::DuplicateIdentifier { id: "db".into() });
        assert!(err.is_topology_error());
        let err = StackplanError::from(StateError::backend("down"));
        assert!(!err.is_topology_error());
    }
}
