//! Storage Class Controller
//!
//! Keeps the `ovirt-csi-sc` StorageClass pointed at the storage domain that
//! holds the boot disk of the node the operator runs on.
//!
//! # Sync flow
//!
//! ```text
//! ClusterCSIDriver ──► state ──► Removed ──► delete if present
//!                          │
//!                          ├──► Managed ──► node UUID ──► resolve domain ─┐
//!                          │                                              │
//!                          └──► Unmanaged ──► empty domain ───────────────┤
//!                                                                         ▼
//!                                      desired class ──► create / apply with diff
//! ```

use crate::controlplane::resolver::StorageDomainResolver;
use crate::controlplane::retry::{retry_on_conflict, ConflictRetry};
use crate::controlplane::state::{self, StorageClassState};
use crate::crd::INSTANCE_NAME;
use crate::domain::ports::{NodeSourceRef, OperatorStatusStoreRef, StorageClassStoreRef};
use crate::error::Result;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument};

/// Name of the managed StorageClass
pub const STORAGE_CLASS_NAME: &str = "ovirt-csi-sc";

/// CSI provisioner the class points at
pub const PROVISIONER: &str = INSTANCE_NAME;

pub const STORAGE_DOMAIN_PARAMETER: &str = "storageDomainName";
pub const THIN_PROVISIONING_PARAMETER: &str = "thinProvisioning";
pub const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

const DEFAULT_RECLAIM_POLICY: &str = "Delete";

// =============================================================================
// Desired State
// =============================================================================

/// Tunables for the generated class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageClassPolicy {
    /// Value of `allowVolumeExpansion` on the generated class
    pub allow_volume_expansion: bool,
}

impl Default for StorageClassPolicy {
    fn default() -> Self {
        Self {
            allow_volume_expansion: true,
        }
    }
}

/// Build the StorageClass the cluster should have for `storage_domain`
pub fn desired_storage_class(storage_domain: &str, policy: &StorageClassPolicy) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(STORAGE_CLASS_NAME.to_string()),
            annotations: Some(BTreeMap::from([(
                DEFAULT_CLASS_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        provisioner: PROVISIONER.to_string(),
        parameters: Some(BTreeMap::from([
            (
                STORAGE_DOMAIN_PARAMETER.to_string(),
                storage_domain.to_string(),
            ),
            (THIN_PROVISIONING_PARAMETER.to_string(), "true".to_string()),
        ])),
        reclaim_policy: Some(DEFAULT_RECLAIM_POLICY.to_string()),
        allow_volume_expansion: Some(policy.allow_volume_expansion),
        ..Default::default()
    }
}

// =============================================================================
// Diff
// =============================================================================

/// What an apply against an existing class has to do
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyPlan {
    /// The existing object already satisfies the desired one
    Unchanged,
    /// Replace with this object (carries the existing resourceVersion)
    Update(StorageClass),
    /// An immutable field differs; delete and create this object
    Recreate(StorageClass),
}

/// Compare an existing class against the desired one.
///
/// Desired annotations and labels overwrite the same keys and leave other
/// keys alone. `allowVolumeExpansion` is never turned off once enabled.
/// Desired fields left unset (binding mode, mount options, topologies) are
/// not enforced.
pub fn plan_update(existing: &StorageClass, desired: &StorageClass) -> ApplyPlan {
    let mut merged = existing.clone();
    let mut changed = merge_string_map(
        &mut merged.metadata.annotations,
        desired.metadata.annotations.as_ref(),
    );
    changed |= merge_string_map(&mut merged.metadata.labels, desired.metadata.labels.as_ref());

    let allow_volume_expansion = if existing.allow_volume_expansion == Some(true) {
        Some(true)
    } else {
        desired.allow_volume_expansion
    };
    if merged.allow_volume_expansion != allow_volume_expansion {
        merged.allow_volume_expansion = allow_volume_expansion;
        changed = true;
    }

    if desired.mount_options.is_some() && merged.mount_options != desired.mount_options {
        merged.mount_options = desired.mount_options.clone();
        changed = true;
    }
    if desired.allowed_topologies.is_some()
        && merged.allowed_topologies != desired.allowed_topologies
    {
        merged.allowed_topologies = desired.allowed_topologies.clone();
        changed = true;
    }

    if immutable_fields_differ(existing, desired) {
        let mut fresh = desired.clone();
        fresh.metadata = ObjectMeta {
            name: desired.metadata.name.clone(),
            labels: merged.metadata.labels,
            annotations: merged.metadata.annotations,
            ..Default::default()
        };
        fresh.allow_volume_expansion = allow_volume_expansion;
        fresh.mount_options = merged.mount_options;
        fresh.allowed_topologies = merged.allowed_topologies;
        return ApplyPlan::Recreate(fresh);
    }

    if changed {
        ApplyPlan::Update(merged)
    } else {
        ApplyPlan::Unchanged
    }
}

fn immutable_fields_differ(existing: &StorageClass, desired: &StorageClass) -> bool {
    let parameters = |sc: &StorageClass| sc.parameters.clone().unwrap_or_default();
    // The API server defaults an unset reclaim policy to Delete
    let reclaim = |sc: &StorageClass| {
        sc.reclaim_policy
            .clone()
            .unwrap_or_else(|| DEFAULT_RECLAIM_POLICY.to_string())
    };

    existing.provisioner != desired.provisioner
        || parameters(existing) != parameters(desired)
        || reclaim(existing) != reclaim(desired)
        || (desired.volume_binding_mode.is_some()
            && existing.volume_binding_mode != desired.volume_binding_mode)
}

fn merge_string_map(
    target: &mut Option<BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };

    let mut changed = false;
    for (key, value) in desired {
        let current = target.get_or_insert_with(BTreeMap::new);
        if current.get(key) != Some(value) {
            current.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

// =============================================================================
// Controller
// =============================================================================

/// Result of one storage class sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Recreated,
    Deleted,
    Unchanged,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Created => write!(f, "created"),
            SyncOutcome::Updated => write!(f, "updated"),
            SyncOutcome::Recreated => write!(f, "recreated"),
            SyncOutcome::Deleted => write!(f, "deleted"),
            SyncOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Reconciles the oVirt CSI StorageClass
pub struct StorageClassController {
    node_name: String,
    nodes: NodeSourceRef,
    storage_classes: StorageClassStoreRef,
    operator_status: OperatorStatusStoreRef,
    resolver: StorageDomainResolver,
    policy: StorageClassPolicy,
    conflict_retry: ConflictRetry,
}

impl StorageClassController {
    pub const NAME: &'static str = "OvirtStorageClassController";

    pub fn new(
        node_name: impl Into<String>,
        nodes: NodeSourceRef,
        storage_classes: StorageClassStoreRef,
        operator_status: OperatorStatusStoreRef,
        resolver: StorageDomainResolver,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            nodes,
            storage_classes,
            operator_status,
            resolver,
            policy: StorageClassPolicy::default(),
            conflict_retry: ConflictRetry::default(),
        }
    }

    pub fn with_policy(mut self, policy: StorageClassPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_conflict_retry(mut self, conflict_retry: ConflictRetry) -> Self {
        self.conflict_retry = conflict_retry;
        self
    }

    /// Run one reconciliation pass
    #[instrument(skip(self), fields(controller = Self::NAME, node = %self.node_name))]
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let management_state = self
            .operator_status
            .get()
            .await?
            .and_then(|driver| driver.management_state());
        let state = state::evaluate(management_state);
        debug!(%state, "Evaluated storage class state");

        if state == StorageClassState::Removed {
            return self.remove().await;
        }

        let storage_domain = if state::is_managed(state) {
            let node_id = self.nodes.system_uuid(&self.node_name).await?;
            self.resolver.resolve(&node_id).await?
        } else {
            String::new()
        };

        let desired = desired_storage_class(&storage_domain, &self.policy);

        let Some(existing) = self.storage_classes.get(STORAGE_CLASS_NAME).await? else {
            self.storage_classes.create(&desired).await?;
            info!(storage_class = STORAGE_CLASS_NAME, domain = %storage_domain, "Created storage class");
            return Ok(SyncOutcome::Created);
        };

        if !state::is_managed(state) {
            debug!(storage_class = STORAGE_CLASS_NAME, "Unmanaged, leaving existing storage class as-is");
            return Ok(SyncOutcome::Unchanged);
        }

        let storage_classes = &self.storage_classes;
        let desired = &desired;
        let mut prefetched = Some(existing);
        let outcome = retry_on_conflict(&self.conflict_retry, "apply storage class", move || {
            let first = prefetched.take();
            async move {
                let existing = match first {
                    Some(existing) => existing,
                    None => match storage_classes.get(STORAGE_CLASS_NAME).await? {
                        Some(existing) => existing,
                        None => {
                            storage_classes.create(desired).await?;
                            return Ok(SyncOutcome::Created);
                        }
                    },
                };
                apply(storage_classes, &existing, desired).await
            }
        })
        .await?;

        match outcome {
            SyncOutcome::Unchanged => {
                debug!(storage_class = STORAGE_CLASS_NAME, "Storage class up to date")
            }
            outcome => {
                info!(storage_class = STORAGE_CLASS_NAME, domain = %storage_domain, %outcome, "Applied storage class")
            }
        }
        Ok(outcome)
    }

    async fn remove(&self) -> Result<SyncOutcome> {
        let storage_classes = &self.storage_classes;
        let outcome = retry_on_conflict(&self.conflict_retry, "remove storage class", move || async move {
            let Some(existing) = storage_classes.get(STORAGE_CLASS_NAME).await? else {
                return Ok(SyncOutcome::Unchanged);
            };
            let resource_version = existing.metadata.resource_version.as_deref();
            if storage_classes.delete(STORAGE_CLASS_NAME, resource_version).await? {
                Ok(SyncOutcome::Deleted)
            } else {
                Ok(SyncOutcome::Unchanged)
            }
        })
        .await?;

        match outcome {
            SyncOutcome::Deleted => {
                info!(storage_class = STORAGE_CLASS_NAME, "Deleted storage class, management state is Removed")
            }
            _ => debug!(storage_class = STORAGE_CLASS_NAME, "Storage class absent, management state is Removed"),
        }
        Ok(outcome)
    }
}

async fn apply(
    storage_classes: &StorageClassStoreRef,
    existing: &StorageClass,
    desired: &StorageClass,
) -> Result<SyncOutcome> {
    match plan_update(existing, desired) {
        ApplyPlan::Unchanged => Ok(SyncOutcome::Unchanged),
        ApplyPlan::Update(updated) => {
            storage_classes.replace(&updated).await?;
            Ok(SyncOutcome::Updated)
        }
        ApplyPlan::Recreate(fresh) => {
            info!(storage_class = STORAGE_CLASS_NAME, "Immutable fields changed, recreating storage class");
            let resource_version = existing.metadata.resource_version.as_deref();
            storage_classes.delete(STORAGE_CLASS_NAME, resource_version).await?;
            if let Err(e) = storage_classes.create(&fresh).await {
                error!(
                    storage_class = STORAGE_CLASS_NAME,
                    error = %e,
                    "Storage class deleted for recreation but create failed, absent until the next sync"
                );
                return Err(e);
            }
            Ok(SyncOutcome::Recreated)
        }
    }
}
