//! Provider interface and adapters.
//!
//! A provider is the external system that actually creates, updates and
//! deletes resources. The core never talks to a cloud API directly; adapters
//! implement [`Provider`] and are selected from the topology configuration.

mod http;
mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProviderError;
use crate::graph::ResourceNode;

pub use http::{HttpProvider, DEFAULT_TIMEOUT_SECS};
pub use local::LocalProvider;

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Handle to a resource that exists on a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderHandle {
    /// Provider-assigned identifier.
    pub id: String,
    /// Outputs published by the resource (endpoints, generated names).
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// Operations every provider adapter supports.
///
/// Each call is expected to be synchronous from the caller's point of view:
/// when it returns, the operation has definitively succeeded or failed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a resource and returns its handle.
    async fn create(&self, node: &ResourceNode) -> ProviderResult<ProviderHandle>;

    /// Updates an existing resource in place.
    async fn update(
        &self,
        node: &ResourceNode,
        handle: &ProviderHandle,
    ) -> ProviderResult<ProviderHandle>;

    /// Deletes a resource.
    async fn delete(&self, node: &ResourceNode, handle: &ProviderHandle) -> ProviderResult<()>;

    /// Gets the adapter type name.
    fn provider_type(&self) -> &'static str;
}

#[async_trait]
impl Provider for Box<dyn Provider> {
    async fn create(&self, node: &ResourceNode) -> ProviderResult<ProviderHandle> {
        (**self).create(node).await
    }

    async fn update(
        &self,
        node: &ResourceNode,
        handle: &ProviderHandle,
    ) -> ProviderResult<ProviderHandle> {
        (**self).update(node, handle).await
    }

    async fn delete(&self, node: &ResourceNode, handle: &ProviderHandle) -> ProviderResult<()> {
        (**self).delete(node, handle).await
    }

    fn provider_type(&self) -> &'static str {
        (**self).provider_type()
    }
}

impl ProviderHandle {
    /// Creates a handle with no outputs.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outputs: BTreeMap::new(),
        }
    }

    /// Adds an output.
    #[cfg(test)]
    #[must_use]
    pub fn with_output(mut self, name: &str, value: impl Into<String>) -> Self {
        self.outputs.insert(name.to_string(), value.into());
        self
    }

    /// Gets an output by name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs.get(name).map(String::as_str)
    }
}

impl std::fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
