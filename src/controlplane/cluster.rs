//! Kubernetes adapters for the cluster ports

use crate::crd::{ClusterCSIDriver, OperatorCondition, INSTANCE_NAME};
use crate::domain::ports::{NodeSource, OperatorStatusStore, StorageClassStore};
use crate::error::{is_not_found, Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams, Preconditions};
use kube::Client;
use serde_json::json;
use tracing::debug;

// =============================================================================
// Nodes
// =============================================================================

/// Reads node system UUIDs from the API server
pub struct KubeNodes {
    api: Api<Node>,
}

impl KubeNodes {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeSource for KubeNodes {
    async fn system_uuid(&self, node_name: &str) -> Result<String> {
        let node = self
            .api
            .get_opt(node_name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Node".into(),
                name: node_name.into(),
            })?;
        node_system_uuid(&node, node_name)
    }
}

/// The VM ID the platform reports through the node's system info
pub fn node_system_uuid(node: &Node, node_name: &str) -> Result<String> {
    node.status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.system_uuid.clone())
        .filter(|uuid| !uuid.is_empty())
        .ok_or_else(|| Error::NodeMissingSystemUuid {
            node: node_name.into(),
        })
}

// =============================================================================
// Storage Classes
// =============================================================================

const STORAGE_CLASS_KIND: &str = "StorageClass";

/// StorageClass CRUD against the API server
pub struct KubeStorageClasses {
    api: Api<StorageClass>,
}

impl KubeStorageClasses {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn object_name(storage_class: &StorageClass) -> &str {
    storage_class.metadata.name.as_deref().unwrap_or_default()
}

/// Delete options pinned to `resource_version` when one is given
pub fn delete_params(resource_version: Option<&str>) -> DeleteParams {
    DeleteParams {
        preconditions: resource_version.map(|rv| Preconditions {
            resource_version: Some(rv.to_string()),
            uid: None,
        }),
        ..Default::default()
    }
}

#[async_trait]
impl StorageClassStore for KubeStorageClasses {
    async fn get(&self, name: &str) -> Result<Option<StorageClass>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, storage_class: &StorageClass) -> Result<StorageClass> {
        let name = object_name(storage_class);
        self.api
            .create(&PostParams::default(), storage_class)
            .await
            .map_err(|e| Error::from_kube_write(e, STORAGE_CLASS_KIND, name))
    }

    async fn replace(&self, storage_class: &StorageClass) -> Result<StorageClass> {
        let name = object_name(storage_class);
        self.api
            .replace(name, &PostParams::default(), storage_class)
            .await
            .map_err(|e| Error::from_kube_write(e, STORAGE_CLASS_KIND, name))
    }

    async fn delete(&self, name: &str, resource_version: Option<&str>) -> Result<bool> {
        match self.api.delete(name, &delete_params(resource_version)).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => {
                debug!(storage_class = name, "Storage class already gone");
                Ok(false)
            }
            Err(e) => Err(Error::from_kube_write(e, STORAGE_CLASS_KIND, name)),
        }
    }
}

// =============================================================================
// Operator Status
// =============================================================================

/// Reads the ClusterCSIDriver and writes its status conditions
pub struct KubeOperatorStatus {
    api: Api<ClusterCSIDriver>,
    name: String,
}

impl KubeOperatorStatus {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
            name: INSTANCE_NAME.to_string(),
        }
    }
}

/// Merge patch replacing the condition list, guarded by the resourceVersion
/// the conditions were computed from
pub fn conditions_patch(
    driver: &ClusterCSIDriver,
    conditions: &[OperatorCondition],
) -> serde_json::Value {
    json!({
        "metadata": { "resourceVersion": driver.metadata.resource_version },
        "status": { "conditions": conditions },
    })
}

#[async_trait]
impl OperatorStatusStore for KubeOperatorStatus {
    async fn get(&self) -> Result<Option<ClusterCSIDriver>> {
        Ok(self.api.get_opt(&self.name).await?)
    }

    async fn write_conditions(
        &self,
        driver: &ClusterCSIDriver,
        conditions: Vec<OperatorCondition>,
    ) -> Result<()> {
        let patch = conditions_patch(driver, &conditions);
        self.api
            .patch_status(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube_write(e, "ClusterCSIDriver", &self.name))?;
        Ok(())
    }
}
