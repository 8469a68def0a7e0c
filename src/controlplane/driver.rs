//! Reconciliation Driver
//!
//! Event-driven scheduling for the controllers. Each controller gets one
//! [`SyncWorker`] fed through a channel of capacity one, so triggers that
//! arrive while a sync is pending collapse into it and only the worker task
//! ever calls `sync`.
//!
//! ```text
//! watch streams ──┐
//! resync ticker ──┼──► TriggerHandle ──► [1] ──► SyncWorker ──► Reconciler::sync
//! requeue timer ──┘                                   │
//!                                                     └──► degraded condition
//! ```

use crate::controlplane::conditions::set_condition;
use crate::controlplane::eol::EolController;
use crate::controlplane::metrics::SyncMetrics;
use crate::controlplane::retry::{retry_on_conflict, ConflictRetry};
use crate::controlplane::storage_class::StorageClassController;
use crate::crd::ConditionStatus;
use crate::domain::ports::OperatorStatusStoreRef;
use crate::error::{Error, ErrorAction, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Reconciler
// =============================================================================

/// A controller the driver can schedule
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Controller name, used in logs, metrics and condition types
    fn name(&self) -> &'static str;

    async fn sync(&self) -> Result<()>;
}

#[async_trait]
impl Reconciler for StorageClassController {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn sync(&self) -> Result<()> {
        StorageClassController::sync(self).await.map(|_| ())
    }
}

#[async_trait]
impl Reconciler for EolController {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn sync(&self) -> Result<()> {
        EolController::sync(self).await.map(|_| ())
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Interval of the periodic resync of every controller
    pub resync_interval: Duration,
    /// Deadline for a single sync
    pub sync_timeout: Duration,
    /// First delay of the failure requeue backoff
    pub requeue_initial: Duration,
    /// Cap of the failure requeue backoff
    pub requeue_max: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(600),
            sync_timeout: Duration::from_secs(120),
            requeue_initial: Duration::from_secs(1),
            requeue_max: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Degraded Reporting
// =============================================================================

pub const DEGRADED_SYNC_ERROR_REASON: &str = "SyncError";
pub const DEGRADED_AS_EXPECTED_REASON: &str = "AsExpected";

/// Mirrors sync results into a `<Controller>Degraded` condition
pub struct DegradedReporter {
    status: OperatorStatusStoreRef,
    condition_type: String,
    conflict_retry: ConflictRetry,
}

impl DegradedReporter {
    pub fn new(controller: &str, status: OperatorStatusStoreRef) -> Self {
        Self {
            status,
            condition_type: format!("{}Degraded", controller),
            conflict_retry: ConflictRetry::default(),
        }
    }

    pub fn with_conflict_retry(mut self, conflict_retry: ConflictRetry) -> Self {
        self.conflict_retry = conflict_retry;
        self
    }

    pub fn condition_type(&self) -> &str {
        &self.condition_type
    }

    /// Record the outcome of a sync. Only writes when the condition changes;
    /// an absent ClusterCSIDriver is skipped.
    pub async fn report(&self, result: &Result<()>) -> Result<()> {
        let (status, reason, message) = match result {
            Ok(()) => (ConditionStatus::False, DEGRADED_AS_EXPECTED_REASON, String::new()),
            Err(e) => (ConditionStatus::True, DEGRADED_SYNC_ERROR_REASON, e.to_string()),
        };

        let store = &self.status;
        let condition_type = self.condition_type.as_str();
        let message = message.as_str();
        retry_on_conflict(&self.conflict_retry, "report degraded", move || async move {
            let Some(driver) = store.get().await? else {
                debug!(condition = condition_type, "No ClusterCSIDriver, skipping degraded report");
                return Ok(());
            };

            let mut conditions = driver.conditions().to_vec();
            if !set_condition(&mut conditions, condition_type, status, reason, message) {
                return Ok(());
            }
            store.write_conditions(&driver, conditions).await?;
            info!(condition = condition_type, %status, reason, "Updated degraded condition");
            Ok(())
        })
        .await
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Cloneable way to ask a worker for a sync
#[derive(Clone)]
pub struct TriggerHandle {
    controller: &'static str,
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    /// Request a sync. Returns `false` when a request is already pending (the
    /// new one is folded into it) or the worker is gone.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!(controller = self.controller, "Sync already pending, coalesced");
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// Runs one controller's syncs, one at a time
pub struct SyncWorker {
    reconciler: Arc<dyn Reconciler>,
    config: DriverConfig,
    degraded: Option<DegradedReporter>,
    metrics: Option<SyncMetrics>,
    rx: mpsc::Receiver<()>,
    handle: TriggerHandle,
}

impl SyncWorker {
    pub fn new(reconciler: Arc<dyn Reconciler>, config: DriverConfig) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let handle = TriggerHandle {
            controller: reconciler.name(),
            tx,
        };
        Self {
            reconciler,
            config,
            degraded: None,
            metrics: None,
            rx,
            handle,
        }
    }

    pub fn with_degraded_reporting(
        mut self,
        status: OperatorStatusStoreRef,
        conflict_retry: ConflictRetry,
    ) -> Self {
        self.degraded = Some(
            DegradedReporter::new(self.reconciler.name(), status).with_conflict_retry(conflict_retry),
        );
        self
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    /// Process triggers until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let name = self.reconciler.name();
        let mut requeue = self.requeue_backoff();
        info!(controller = name, "Starting sync worker");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.rx.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
            }

            let result = self.run_sync(&cancel).await;
            if matches!(result, Err(Error::Cancelled)) {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.report(&result) => {}
            }

            match result {
                Ok(()) => requeue.reset(),
                Err(e) => {
                    let delay = match e.action() {
                        ErrorAction::RequeueWithBackoff => requeue
                            .next_backoff()
                            .unwrap_or(self.config.requeue_max),
                        ErrorAction::RequeueAfter(delay) => delay,
                        ErrorAction::NoRequeue => {
                            warn!(controller = name, error = %e, "Sync failed, waiting for the next change");
                            continue;
                        }
                    };
                    warn!(
                        controller = name,
                        error = %e,
                        requeue_ms = delay.as_millis() as u64,
                        "Sync failed, requeueing"
                    );
                    self.requeue_after(delay, &cancel);
                }
            }
        }

        info!(controller = name, "Sync worker stopped");
    }

    async fn run_sync(&self, cancel: &CancellationToken) -> Result<()> {
        let name = self.reconciler.name();
        let timeout = self.config.sync_timeout;
        let started = Instant::now();
        debug!(controller = name, "Sync started");

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(timeout, self.reconciler.sync()) => {
                outcome.unwrap_or(Err(Error::Timeout(timeout)))
            }
        };

        if let Some(metrics) = &self.metrics {
            if !matches!(result, Err(Error::Cancelled)) {
                metrics.observe(name, started.elapsed(), result.is_err());
            }
        }
        debug!(controller = name, elapsed_ms = started.elapsed().as_millis() as u64, ok = result.is_ok(), "Sync finished");
        result
    }

    async fn report(&self, result: &Result<()>) {
        let Some(degraded) = &self.degraded else {
            return;
        };
        if let Err(e) = degraded.report(result).await {
            warn!(
                controller = self.reconciler.name(),
                condition = degraded.condition_type(),
                error = %e,
                "Failed to report degraded condition"
            );
        }
    }

    fn requeue_after(&self, delay: Duration, cancel: &CancellationToken) {
        let handle = self.handle.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    handle.trigger();
                }
            }
        });
    }

    fn requeue_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.requeue_initial)
            .with_max_interval(self.config.requeue_max)
            .with_max_elapsed_time(None)
            .build()
    }
}

// =============================================================================
// Trigger Sources
// =============================================================================

/// Trigger every handle on each tick, starting immediately
pub async fn resync_loop(interval: Duration, handles: Vec<TriggerHandle>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                debug!("Periodic resync");
                for handle in &handles {
                    handle.trigger();
                }
            }
        }
    }
}

/// Watch one named object and trigger every handle on any event for it
pub async fn watch_and_trigger<K>(
    api: Api<K>,
    name: String,
    handles: Vec<TriggerHandle>,
    cancel: CancellationToken,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
    let stream = watcher(api, config).default_backoff();
    tokio::pin!(stream);

    let name = name.as_str();
    info!(kind = %kind, name, "Watching");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(_)) => {
                    debug!(kind = %kind, name, "Watch event");
                    for handle in &handles {
                        handle.trigger();
                    }
                }
                Some(Err(e)) => warn!(kind = %kind, name, error = %e, "Watch error, backing off"),
                None => break,
            }
        }
    }
}
