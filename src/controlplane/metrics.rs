//! Prometheus metrics for controller syncs

use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Per-controller sync counters and latency
#[derive(Clone)]
pub struct SyncMetrics {
    syncs: IntCounterVec,
    errors: IntCounterVec,
    duration: HistogramVec,
}

impl SyncMetrics {
    /// Create the metrics and register them with `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let syncs = IntCounterVec::new(
            Opts::new("ovirt_operator_syncs_total", "Total number of controller syncs"),
            &["controller"],
        )
        .map_err(metrics_error)?;
        let errors = IntCounterVec::new(
            Opts::new(
                "ovirt_operator_sync_errors_total",
                "Number of controller syncs that returned an error",
            ),
            &["controller"],
        )
        .map_err(metrics_error)?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "ovirt_operator_sync_duration_seconds",
                "Duration of controller syncs",
            ),
            &["controller"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(syncs.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(errors.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            syncs,
            errors,
            duration,
        })
    }

    pub fn observe(&self, controller: &str, elapsed: Duration, failed: bool) {
        self.syncs.with_label_values(&[controller]).inc();
        if failed {
            self.errors.with_label_values(&[controller]).inc();
        }
        self.duration
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics registration failed: {}", e))
}
