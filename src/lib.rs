//! oVirt CSI Operator
//!
//! A Kubernetes operator that keeps the `ovirt-csi-sc` StorageClass pointed
//! at the oVirt storage domain backing the cluster's VMs, and flags the
//! operator as not upgradeable now that oVirt is end-of-life.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            Orchestrator                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   watches (Node, StorageClass, ClusterCSIDriver) + periodic resync   │
//! │                                 │                                    │
//! │                 ┌───────────────┴───────────────┐                    │
//! │                 ▼                               ▼                    │
//! │    ┌─────────────────────────┐     ┌─────────────────────────┐       │
//! │    │ StorageClassController  │     │      EolController      │       │
//! │    │ (state → resolve →      │     │ (Upgradeable=False,     │       │
//! │    │  desired → apply/diff)  │     │  written once)          │       │
//! │    └────────────┬────────────┘     └────────────┬────────────┘       │
//! ├─────────────────┼───────────────────────────────┼────────────────────┤
//! │   StorageDomainResolver ──► PlatformFactory     │   Cluster ports    │
//! │                             (oVirt REST API)    │   (kube-rs Api)    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: controllers, driver, platform and cluster adapters
//! - [`crd`]: the ClusterCSIDriver custom resource
//! - [`domain`]: port traits and platform types
//! - [`error`]: error types and handling

pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use controlplane::{
    ClusterPorts, ConflictRetry, DriverConfig, EolController, EolState, OvirtConfig,
    Orchestrator, OrchestratorConfig, PlatformFactory, StorageClassController,
    StorageClassPolicy, StorageClassState, StorageDomainResolver, SyncMetrics, SyncOutcome,
};

pub use crd::{
    ClusterCSIDriver, ClusterCSIDriverSpec, ClusterCSIDriverStatus, ConditionStatus,
    ManagementState, OperatorCondition,
};

pub use domain::ports::{
    Disk, DiskAttachment, NodeSource, OperatorStatusStore, PlatformClient, PlatformConnector,
    StorageClassStore, StorageDomain,
};

pub use error::{Error, ErrorAction, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
