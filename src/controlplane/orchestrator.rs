//! Main Orchestrator
//!
//! Wires the controllers to their ports and runs them:
//! - the storage class controller and the EOL gate, each on its own worker
//! - watches on the operator's Node, the StorageClass and the ClusterCSIDriver
//! - the periodic resync

use crate::controlplane::cluster::{KubeNodes, KubeOperatorStatus, KubeStorageClasses};
use crate::controlplane::driver::{
    resync_loop, watch_and_trigger, DriverConfig, SyncWorker, TriggerHandle,
};
use crate::controlplane::eol::EolController;
use crate::controlplane::metrics::SyncMetrics;
use crate::controlplane::platform::PlatformFactory;
use crate::controlplane::resolver::StorageDomainResolver;
use crate::controlplane::retry::ConflictRetry;
use crate::controlplane::storage_class::{
    StorageClassController, StorageClassPolicy, STORAGE_CLASS_NAME,
};
use crate::crd::{ClusterCSIDriver, INSTANCE_NAME};
use crate::domain::ports::{NodeSourceRef, OperatorStatusStoreRef, StorageClassStoreRef};
use crate::error::Result;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Node whose boot disk decides the storage domain
    pub node_name: String,
    /// Scheduling of the controllers
    pub driver: DriverConfig,
    /// Shape of the generated storage class
    pub storage_class: StorageClassPolicy,
    /// Retry budget for optimistic-concurrency conflicts
    pub conflict_retry: ConflictRetry,
}

impl OrchestratorConfig {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            driver: DriverConfig::default(),
            storage_class: StorageClassPolicy::default(),
            conflict_retry: ConflictRetry::default(),
        }
    }
}

/// Cluster-side ports used by the controllers
#[derive(Clone)]
pub struct ClusterPorts {
    pub nodes: NodeSourceRef,
    pub storage_classes: StorageClassStoreRef,
    pub operator_status: OperatorStatusStoreRef,
}

impl ClusterPorts {
    /// Ports backed by the Kubernetes API
    pub fn kube(client: Client) -> Self {
        Self {
            nodes: Arc::new(KubeNodes::new(client.clone())),
            storage_classes: Arc::new(KubeStorageClasses::new(client.clone())),
            operator_status: Arc::new(KubeOperatorStatus::new(client)),
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs both controllers until cancelled
pub struct Orchestrator {
    config: OrchestratorConfig,
    ports: ClusterPorts,
    platform: Arc<PlatformFactory>,
    watch_client: Option<Client>,
    metrics: Option<SyncMetrics>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, ports: ClusterPorts, platform: Arc<PlatformFactory>) -> Self {
        Self {
            config,
            ports,
            platform,
            watch_client: None,
            metrics: None,
        }
    }

    /// Trigger syncs from watch events on the cluster behind `client`
    pub fn with_watches(mut self, client: Client) -> Self {
        self.watch_client = Some(client);
        self
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until `cancel` fires and every task has stopped
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let config = self.config;

        let storage_class = StorageClassController::new(
            config.node_name.clone(),
            self.ports.nodes.clone(),
            self.ports.storage_classes.clone(),
            self.ports.operator_status.clone(),
            StorageDomainResolver::new(self.platform.clone()),
        )
        .with_policy(config.storage_class.clone())
        .with_conflict_retry(config.conflict_retry.clone());

        let eol = EolController::new(self.ports.operator_status.clone())
            .with_conflict_retry(config.conflict_retry.clone());

        let mut storage_class_worker = SyncWorker::new(Arc::new(storage_class), config.driver.clone())
            .with_degraded_reporting(
                self.ports.operator_status.clone(),
                config.conflict_retry.clone(),
            );
        let mut eol_worker = SyncWorker::new(Arc::new(eol), config.driver.clone());
        if let Some(metrics) = self.metrics {
            storage_class_worker = storage_class_worker.with_metrics(metrics.clone());
            eol_worker = eol_worker.with_metrics(metrics);
        }

        let storage_class_trigger = storage_class_worker.handle();
        let eol_trigger = eol_worker.handle();
        let everyone = vec![storage_class_trigger.clone(), eol_trigger.clone()];

        let mut tasks = JoinSet::new();
        tasks.spawn(storage_class_worker.run(cancel.clone()));
        tasks.spawn(eol_worker.run(cancel.clone()));
        tasks.spawn(resync_loop(
            config.driver.resync_interval,
            everyone.clone(),
            cancel.clone(),
        ));

        if let Some(client) = self.watch_client {
            spawn_watches(&mut tasks, client, &config.node_name, storage_class_trigger, everyone, &cancel);
        }

        info!(
            node = %config.node_name,
            resync_secs = config.driver.resync_interval.as_secs(),
            "Orchestrator running"
        );

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Controller task failed");
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }
}

fn spawn_watches(
    tasks: &mut JoinSet<()>,
    client: Client,
    node_name: &str,
    storage_class: TriggerHandle,
    everyone: Vec<TriggerHandle>,
    cancel: &CancellationToken,
) {
    tasks.spawn(watch_and_trigger(
        Api::<Node>::all(client.clone()),
        node_name.to_string(),
        vec![storage_class.clone()],
        cancel.clone(),
    ));
    tasks.spawn(watch_and_trigger(
        Api::<StorageClass>::all(client.clone()),
        STORAGE_CLASS_NAME.to_string(),
        vec![storage_class],
        cancel.clone(),
    ));
    tasks.spawn(watch_and_trigger(
        Api::<ClusterCSIDriver>::all(client),
        INSTANCE_NAME.to_string(),
        everyone,
        cancel.clone(),
    ));
}
