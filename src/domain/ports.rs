//! Domain Ports - Core trait definitions for the operator
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems: the oVirt engine on one side and the Kubernetes API on
//! the other. Adapters implement these traits to provide concrete
//! functionality; tests substitute in-memory fakes.

use crate::crd::{ClusterCSIDriver, OperatorCondition};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Platform Types
// =============================================================================

/// Association between a virtual disk and a VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskAttachment {
    /// Attachment ID
    pub id: String,
    /// Whether this is the VM's boot disk
    pub bootable: bool,
    /// ID of the attached disk
    pub disk_id: String,
}

/// A virtual disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub id: String,
    /// Storage domains holding the disk, in platform order
    pub storage_domain_ids: Vec<String>,
}

/// A named storage backend on the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDomain {
    pub id: String,
    pub name: String,
}

// =============================================================================
// Platform Client Port
// =============================================================================

/// Read-only view of the virtualization platform
///
/// Every method may fail with `PlatformUnavailable` (transport or auth failure)
/// or `PlatformNotFound` (the referenced object no longer exists).
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// List the disk attachments of a VM, in the order the platform returns them
    async fn list_disk_attachments(&self, vm_id: &str) -> Result<Vec<DiskAttachment>>;

    /// Fetch a disk by ID
    async fn fetch_disk(&self, disk_id: &str) -> Result<Disk>;

    /// Fetch a storage domain by ID
    async fn fetch_storage_domain(&self, domain_id: &str) -> Result<StorageDomain>;

    /// Check that the session is still usable
    async fn health_check(&self) -> Result<()>;
}

/// Establishes fresh platform sessions
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    async fn connect(&self) -> Result<PlatformClientRef>;
}

// =============================================================================
// Cluster Ports
// =============================================================================

/// Read access to cluster nodes
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Platform system identifier (the VM ID) reported by the named node
    async fn system_uuid(&self, node_name: &str) -> Result<String>;
}

/// Read/write access to StorageClass objects
#[async_trait]
pub trait StorageClassStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<StorageClass>>;

    async fn create(&self, storage_class: &StorageClass) -> Result<StorageClass>;

    /// Replace an existing object; the object's `resourceVersion` is the
    /// optimistic-concurrency precondition and a mismatch yields
    /// `ClusterWriteConflict`
    async fn replace(&self, storage_class: &StorageClass) -> Result<StorageClass>;

    /// Delete by name, returning `false` if nothing was there. With a
    /// `resource_version` the delete only applies to that revision and a
    /// newer one yields `ClusterWriteConflict`.
    async fn delete(&self, name: &str, resource_version: Option<&str>) -> Result<bool>;
}

/// Read access to the ClusterCSIDriver and write access to its conditions
#[async_trait]
pub trait OperatorStatusStore: Send + Sync {
    async fn get(&self) -> Result<Option<ClusterCSIDriver>>;

    /// Replace the condition list of the driver as read; the driver's
    /// `resourceVersion` is the optimistic-concurrency precondition
    async fn write_conditions(
        &self,
        driver: &ClusterCSIDriver,
        conditions: Vec<OperatorCondition>,
    ) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type PlatformClientRef = Arc<dyn PlatformClient>;
pub type PlatformConnectorRef = Arc<dyn PlatformConnector>;
pub type NodeSourceRef = Arc<dyn NodeSource>;
pub type StorageClassStoreRef = Arc<dyn StorageClassStore>;
pub type OperatorStatusStoreRef = Arc<dyn OperatorStatusStore>;
