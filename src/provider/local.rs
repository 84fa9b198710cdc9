//! Simulated provider backed by a local inventory file.
//!
//! The inventory stands in for a cloud account: every created resource gets
//! a generated identifier and kind-specific outputs, and is persisted so later
//! runs can update or delete it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::graph::{PropertyBag, ResourceKind, ResourceNode};

use super::{Provider, ProviderHandle, ProviderResult};

/// Inventory file name.
const INVENTORY_FILE: &str = "inventory.json";

/// Length of the random part of generated identifiers.
const ID_SUFFIX_LEN: usize = 12;

/// Provider that records resources in a local JSON inventory.
#[derive(Debug)]
pub struct LocalProvider {
    /// Path to the inventory file.
    inventory_path: PathBuf,
    /// Serializes read-modify-write cycles on the inventory.
    guard: Mutex<()>,
}

/// Persisted inventory.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Inventory {
    /// Resources keyed by provider identifier.
    resources: BTreeMap<String, InventoryEntry>,
}

/// A resource in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InventoryEntry {
    /// Topology identifier of the resource.
    resource: String,
    /// Resource kind.
    kind: ResourceKind,
    /// Last applied properties.
    properties: PropertyBag,
    /// Published outputs.
    outputs: BTreeMap<String, String>,
    /// When the resource was created.
    created_at: DateTime<Utc>,
    /// When the resource was last updated.
    updated_at: DateTime<Utc>,
}

impl LocalProvider {
    /// Creates a provider storing its inventory in `dir`.
    #[must_use]
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            inventory_path: dir.into().join(INVENTORY_FILE),
            guard: Mutex::new(()),
        }
    }

    /// Returns the number of resources in the inventory.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory cannot be read.
    #[cfg(test)]
    pub async fn resource_count(&self) -> ProviderResult<usize> {
        let _guard = self.guard.lock().await;
        Ok(self.load().await?.resources.len())
    }

    /// Reads the inventory, returning an empty one if none exists.
    async fn load(&self) -> ProviderResult<Inventory> {
        if !self.inventory_path.exists() {
            return Ok(Inventory::default());
        }

        let content = fs::read_to_string(&self.inventory_path)
            .await
            .map_err(|e| ProviderError::rejected(format!("Failed to read inventory: {e}")))?;

        serde_json::from_str(&content).map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse inventory: {e}"),
        })
    }

    /// Writes the inventory through a temporary file.
    async fn save(&self, inventory: &Inventory) -> ProviderResult<()> {
        if let Some(parent) = self.inventory_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ProviderError::rejected(format!("Failed to create inventory directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(inventory)
            .map_err(|e| ProviderError::rejected(format!("Failed to serialize inventory: {e}")))?;

        let temp_path = self.inventory_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| ProviderError::rejected(format!("Failed to create inventory: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| ProviderError::rejected(format!("Failed to write inventory: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| ProviderError::rejected(format!("Failed to sync inventory: {e}")))?;

        fs::rename(&temp_path, &self.inventory_path)
            .await
            .map_err(|e| ProviderError::rejected(format!("Failed to rename inventory: {e}")))
    }

    /// Computes the outputs a resource of this kind publishes.
    fn outputs_for(node: &ResourceNode, provider_id: &str) -> BTreeMap<String, String> {
        let mut outputs = BTreeMap::new();
        outputs.insert(String::from("id"), provider_id.to_string());

        let arn = |service: &str, kind: &str| format!("arn:local:{service}:{kind}/{provider_id}");

        match node.kind {
            ResourceKind::Network => {
                outputs.insert(String::from("vpc_id"), provider_id.to_string());
                outputs.insert(
                    String::from("cidr"),
                    property_string(&node.properties, "cidr")
                        .unwrap_or_else(|| String::from("10.0.0.0/16")),
                );
            }
            ResourceKind::Cluster => {
                outputs.insert(String::from("cluster_arn"), arn("ecs", "cluster"));
            }
            ResourceKind::Database => {
                outputs.insert(
                    String::from("endpoint"),
                    format!("{provider_id}.cluster.local"),
                );
                outputs.insert(
                    String::from("port"),
                    property_string(&node.properties, "port")
                        .unwrap_or_else(|| String::from("3306")),
                );
                outputs.insert(String::from("secret_arn"), arn("secretsmanager", "secret"));
            }
            ResourceKind::TaskDefinition => {
                outputs.insert(String::from("task_definition_arn"), arn("ecs", "task-definition"));
            }
            ResourceKind::Service => {
                outputs.insert(String::from("service_name"), node.id.clone());
            }
            ResourceKind::LoadBalancer => {
                outputs.insert(String::from("dns_name"), format!("{provider_id}.elb.local"));
            }
            ResourceKind::ScalingPolicy => {
                outputs.insert(String::from("policy_arn"), arn("autoscaling", "policy"));
            }
            ResourceKind::Role => {
                outputs.insert(String::from("role_arn"), arn("iam", "role"));
            }
        }

        outputs
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn create(&self, node: &ResourceNode) -> ProviderResult<ProviderHandle> {
        let _guard = self.guard.lock().await;
        let mut inventory = self.load().await?;

        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(ID_SUFFIX_LEN).collect();
        let provider_id = format!("{}-{suffix}", node.kind.prefix());
        let outputs = Self::outputs_for(node, &provider_id);
        let now = Utc::now();

        inventory.resources.insert(
            provider_id.clone(),
            InventoryEntry {
                resource: node.id.clone(),
                kind: node.kind,
                properties: node.properties.clone(),
                outputs: outputs.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        self.save(&inventory).await?;

        info!("Created {} as {provider_id}", node);
        Ok(ProviderHandle {
            id: provider_id,
            outputs,
        })
    }

    async fn update(
        &self,
        node: &ResourceNode,
        handle: &ProviderHandle,
    ) -> ProviderResult<ProviderHandle> {
        let _guard = self.guard.lock().await;
        let mut inventory = self.load().await?;

        let Some(entry) = inventory.resources.get_mut(&handle.id) else {
            return Err(ProviderError::NotFound {
                id: handle.id.clone(),
            });
        };

        if entry.kind != node.kind {
            return Err(ProviderError::rejected(format!(
                "Cannot change kind of {} from {} to {} in place",
                handle.id, entry.kind, node.kind
            )));
        }

        let outputs = Self::outputs_for(node, &handle.id);
        entry.properties.clone_from(&node.properties);
        entry.outputs.clone_from(&outputs);
        entry.updated_at = Utc::now();
        self.save(&inventory).await?;

        info!("Updated {} ({})", node, handle.id);
        Ok(ProviderHandle {
            id: handle.id.clone(),
            outputs,
        })
    }

    async fn delete(&self, node: &ResourceNode, handle: &ProviderHandle) -> ProviderResult<()> {
        let _guard = self.guard.lock().await;
        let mut inventory = self.load().await?;

        if inventory.resources.remove(&handle.id).is_none() {
            debug!("{} ({}) is not in the inventory", node, handle.id);
            return Err(ProviderError::NotFound {
                id: handle.id.clone(),
            });
        }
        self.save(&inventory).await?;

        info!("Deleted {} ({})", node, handle.id);
        Ok(())
    }

    fn provider_type(&self) -> &'static str {
        "local"
    }
}

/// Renders a property as a plain string.
fn property_string(properties: &PropertyBag, key: &str) -> Option<String> {
    properties.get(key).map(|v| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn node(id: &str, kind: ResourceKind) -> ResourceNode {
        ResourceNode {
            id: id.to_string(),
            kind,
            properties: PropertyBag::new(),
            dependencies: vec![],
            wiring: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_publishes_kind_outputs() {
        let temp = TempDir::new().expect("temp dir");
        let provider = LocalProvider::with_dir(temp.path());

        let mut db = node("db", ResourceKind::Database);
        db.properties.insert(String::from("port"), json!(3307));
        let handle = provider.create(&db).await.expect("create");

        assert!(handle.id.starts_with("db-"));
        assert_eq!(handle.output("port"), Some("3307"));
        assert_eq!(
            handle.output("endpoint"),
            Some(format!("{}.cluster.local", handle.id).as_str())
        );
        assert_eq!(provider.resource_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_update_keeps_identifier() {
        let temp = TempDir::new().expect("temp dir");
        let provider = LocalProvider::with_dir(temp.path());

        let mut lb = node("lb", ResourceKind::LoadBalancer);
        let handle = provider.create(&lb).await.expect("create");
        lb.properties.insert(String::from("public"), json!(true));
        let updated = provider.update(&lb, &handle).await.expect("update");

        assert_eq!(updated.id, handle.id);
        assert_eq!(updated.output("dns_name"), handle.output("dns_name"));
    }

    #[tokio::test]
    async fn test_update_rejects_kind_change() {
        let temp = TempDir::new().expect("temp dir");
        let provider = LocalProvider::with_dir(temp.path());

        let handle = provider.create(&node("x", ResourceKind::Role)).await.expect("create");
        let result = provider.update(&node("x", ResourceKind::Service), &handle).await;
        assert!(matches!(result, Err(ProviderError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let temp = TempDir::new().expect("temp dir");
        let provider = LocalProvider::with_dir(temp.path());

        let result = provider
            .delete(&node("net", ResourceKind::Network), &ProviderHandle::new("net-missing"))
            .await;
        assert_eq!(
            result,
            Err(ProviderError::NotFound {
                id: String::from("net-missing")
            })
        );
    }

    #[tokio::test]
    async fn test_inventory_survives_new_instance() {
        let temp = TempDir::new().expect("temp dir");
        let net = node("net", ResourceKind::Network);
        let handle = LocalProvider::with_dir(temp.path())
            .create(&net)
            .await
            .expect("create");

        let provider = LocalProvider::with_dir(temp.path());
        provider.delete(&net, &handle).await.expect("delete");
        assert_eq!(provider.resource_count().await.expect("count"), 0);
    }
}
