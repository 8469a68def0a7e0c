//! In-memory fakes of the domain ports, shared by the unit tests

use crate::crd::{ClusterCSIDriver, ClusterCSIDriverSpec, ManagementState, OperatorCondition};
use crate::domain::ports::{
    Disk, DiskAttachment, NodeSource, OperatorStatusStore, PlatformClient, PlatformClientRef,
    PlatformConnector, StorageClassStore, StorageDomain,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::error::ErrorResponse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// Platform
// =============================================================================

#[derive(Default)]
struct PlatformState {
    attachments: HashMap<String, Vec<DiskAttachment>>,
    disks: HashMap<String, Disk>,
    domains: HashMap<String, StorageDomain>,
    unhealthy: bool,
    unavailable: bool,
    calls: Vec<String>,
}

/// Scriptable oVirt topology that records every call
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attachment(self, vm_id: &str, id: &str, bootable: bool, disk_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .attachments
            .entry(vm_id.to_string())
            .or_default()
            .push(DiskAttachment {
                id: id.to_string(),
                bootable,
                disk_id: disk_id.to_string(),
            });
        self
    }

    pub fn with_disk(self, id: &str, domain_ids: &[&str]) -> Self {
        self.state.lock().unwrap().disks.insert(
            id.to_string(),
            Disk {
                id: id.to_string(),
                storage_domain_ids: domain_ids.iter().map(|d| d.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_domain(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().domains.insert(
            id.to_string(),
            StorageDomain {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unwrap().unhealthy = !healthy;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Number of calls to the named method
    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(method))
            .count()
    }

    /// Every call in order, as `"method arg"`
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, method: &str, arg: &str) -> Result<std::sync::MutexGuard<'_, PlatformState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {}", method, arg).trim_end().to_string());
        if state.unavailable {
            return Err(Error::PlatformUnavailable {
                reason: "connection refused".into(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn list_disk_attachments(&self, vm_id: &str) -> Result<Vec<DiskAttachment>> {
        let state = self.record("list_disk_attachments", vm_id)?;
        Ok(state.attachments.get(vm_id).cloned().unwrap_or_default())
    }

    async fn fetch_disk(&self, disk_id: &str) -> Result<Disk> {
        let state = self.record("fetch_disk", disk_id)?;
        state
            .disks
            .get(disk_id)
            .cloned()
            .ok_or_else(|| Error::PlatformNotFound {
                kind: "disk".into(),
                id: disk_id.into(),
            })
    }

    async fn fetch_storage_domain(&self, domain_id: &str) -> Result<StorageDomain> {
        let state = self.record("fetch_storage_domain", domain_id)?;
        state
            .domains
            .get(domain_id)
            .cloned()
            .ok_or_else(|| Error::PlatformNotFound {
                kind: "storage domain".into(),
                id: domain_id.into(),
            })
    }

    async fn health_check(&self) -> Result<()> {
        let state = self.record("health_check", "")?;
        if state.unhealthy {
            return Err(Error::PlatformUnavailable {
                reason: "session expired".into(),
            });
        }
        Ok(())
    }
}

/// Connector that hands out a [`FakePlatform`] and counts attempts
pub struct FakeConnector {
    platform: FakePlatform,
    unreachable: AtomicBool,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new(platform: FakePlatform) -> Arc<Self> {
        Arc::new(Self {
            platform,
            unreachable: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Connection attempts so far, successful or not
    pub fn connects(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformConnector for FakeConnector {
    async fn connect(&self) -> Result<PlatformClientRef> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::PlatformUnavailable {
                reason: "no route to host".into(),
            });
        }
        Ok(Arc::new(self.platform.clone()))
    }
}

// =============================================================================
// Cluster
// =============================================================================

#[derive(Default)]
struct ClusterState {
    nodes: HashMap<String, String>,
    storage_classes: BTreeMap<String, StorageClass>,
    driver: Option<ClusterCSIDriver>,
    next_version: u64,
    sc_conflicts: usize,
    delete_conflicts: usize,
    failing_creates: usize,
    status_conflicts: usize,
    delete_attempts: usize,
    writes: Vec<String>,
}

impl ClusterState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// API-server stand-in with resourceVersion bookkeeping and a write log
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

fn conflict(kind: &str, name: &str) -> Error {
    Error::ClusterWriteConflict {
        kind: kind.into(),
        name: name.into(),
    }
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(&self, name: &str, system_uuid: &str) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(name.to_string(), system_uuid.to_string());
    }

    /// Store a storage class as if another actor had written it
    pub fn put_storage_class(&self, mut sc: StorageClass) {
        let mut state = self.state.lock().unwrap();
        sc.metadata.resource_version = Some(state.bump());
        let name = sc.metadata.name.clone().unwrap_or_default();
        state.storage_classes.insert(name, sc);
    }

    pub fn storage_class(&self, name: &str) -> Option<StorageClass> {
        self.state.lock().unwrap().storage_classes.get(name).cloned()
    }

    /// Install (or remove) the ClusterCSIDriver
    pub fn set_driver(&self, management_state: Option<ManagementState>) {
        let mut state = self.state.lock().unwrap();
        let mut driver = ClusterCSIDriver::new(
            crate::crd::INSTANCE_NAME,
            ClusterCSIDriverSpec {
                management_state,
                ..Default::default()
            },
        );
        driver.metadata.resource_version = Some(state.bump());
        state.driver = Some(driver);
    }

    pub fn remove_driver(&self) {
        self.state.lock().unwrap().driver = None;
    }

    pub fn set_conditions(&self, conditions: Vec<OperatorCondition>) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        if let Some(driver) = state.driver.as_mut() {
            driver.status.get_or_insert_with(Default::default).conditions = conditions;
            driver.metadata.resource_version = Some(version);
        }
    }

    pub fn conditions(&self) -> Vec<OperatorCondition> {
        self.state
            .lock()
            .unwrap()
            .driver
            .as_ref()
            .map(|d| d.conditions().to_vec())
            .unwrap_or_default()
    }

    /// Make the next `n` storage class replaces fail as if someone else wrote first
    pub fn inject_storage_class_conflicts(&self, n: usize) {
        self.state.lock().unwrap().sc_conflicts = n;
    }

    /// Make the next `n` storage class deletes see a newer revision, as if
    /// someone else rewrote the object just before
    pub fn inject_delete_conflicts(&self, n: usize) {
        self.state.lock().unwrap().delete_conflicts = n;
    }

    /// Make the next `n` storage class creates fail with a server error
    pub fn fail_creates(&self, n: usize) {
        self.state.lock().unwrap().failing_creates = n;
    }

    /// DELETE requests received, including ones for absent objects
    pub fn delete_attempts(&self) -> usize {
        self.state.lock().unwrap().delete_attempts
    }

    /// Make the next `n` status writes fail as if someone else wrote first
    pub fn inject_status_conflicts(&self, n: usize) {
        self.state.lock().unwrap().status_conflicts = n;
    }

    /// Successful writes so far, as `"verb kind"`
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes.len()
    }
}

#[async_trait]
impl NodeSource for FakeCluster {
    async fn system_uuid(&self, node_name: &str) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(node_name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Node".into(),
                name: node_name.into(),
            })
    }
}

#[async_trait]
impl StorageClassStore for FakeCluster {
    async fn get(&self, name: &str) -> Result<Option<StorageClass>> {
        Ok(self.storage_class(name))
    }

    async fn create(&self, storage_class: &StorageClass) -> Result<StorageClass> {
        let mut state = self.state.lock().unwrap();
        let name = storage_class.metadata.name.clone().unwrap_or_default();
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(Error::Kube(kube::Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: "etcdserver: request timed out".into(),
                reason: "InternalError".into(),
                code: 500,
            })));
        }
        if state.storage_classes.contains_key(&name) {
            return Err(Error::Kube(kube::Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: format!("storageclasses \"{}\" already exists", name),
                reason: "AlreadyExists".into(),
                code: 409,
            })));
        }

        let mut stored = storage_class.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.storage_classes.insert(name, stored.clone());
        state.writes.push("create StorageClass".into());
        Ok(stored)
    }

    async fn replace(&self, storage_class: &StorageClass) -> Result<StorageClass> {
        let mut state = self.state.lock().unwrap();
        let name = storage_class.metadata.name.clone().unwrap_or_default();
        let current_version = match state.storage_classes.get(&name) {
            Some(current) => current.metadata.resource_version.clone(),
            None => {
                return Err(Error::ResourceNotFound {
                    kind: "StorageClass".into(),
                    name,
                })
            }
        };

        if state.sc_conflicts > 0 {
            state.sc_conflicts -= 1;
            let version = state.bump();
            if let Some(current) = state.storage_classes.get_mut(&name) {
                current.metadata.resource_version = Some(version);
            }
            return Err(conflict("StorageClass", &name));
        }
        if storage_class.metadata.resource_version != current_version {
            return Err(conflict("StorageClass", &name));
        }

        let mut stored = storage_class.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.storage_classes.insert(name, stored.clone());
        state.writes.push("replace StorageClass".into());
        Ok(stored)
    }

    async fn delete(&self, name: &str, resource_version: Option<&str>) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.delete_attempts += 1;
        if !state.storage_classes.contains_key(name) {
            return Ok(false);
        }

        if state.delete_conflicts > 0 {
            state.delete_conflicts -= 1;
            let version = state.bump();
            if let Some(current) = state.storage_classes.get_mut(name) {
                current.metadata.resource_version = Some(version);
            }
            return Err(conflict("StorageClass", name));
        }
        let current_version = state
            .storage_classes
            .get(name)
            .and_then(|current| current.metadata.resource_version.clone());
        if resource_version.is_some() && resource_version != current_version.as_deref() {
            return Err(conflict("StorageClass", name));
        }

        state.storage_classes.remove(name);
        state.writes.push("delete StorageClass".into());
        Ok(true)
    }
}

#[async_trait]
impl OperatorStatusStore for FakeCluster {
    async fn get(&self) -> Result<Option<ClusterCSIDriver>> {
        Ok(self.state.lock().unwrap().driver.clone())
    }

    async fn write_conditions(
        &self,
        driver: &ClusterCSIDriver,
        conditions: Vec<OperatorCondition>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let current_version = match state.driver.as_ref() {
            Some(current) => current.metadata.resource_version.clone(),
            None => {
                return Err(Error::ResourceNotFound {
                    kind: "ClusterCSIDriver".into(),
                    name: crate::crd::INSTANCE_NAME.into(),
                })
            }
        };

        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            let version = state.bump();
            if let Some(current) = state.driver.as_mut() {
                current.metadata.resource_version = Some(version);
            }
            return Err(conflict("ClusterCSIDriver", crate::crd::INSTANCE_NAME));
        }
        if driver.metadata.resource_version != current_version {
            return Err(conflict("ClusterCSIDriver", crate::crd::INSTANCE_NAME));
        }

        let version = state.bump();
        if let Some(current) = state.driver.as_mut() {
            current.status.get_or_insert_with(Default::default).conditions = conditions;
            current.metadata.resource_version = Some(version);
        }
        state.writes.push("status ClusterCSIDriver".into());
        Ok(())
    }
}
