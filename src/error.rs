//! Error types for the oVirt CSI operator
//!
//! Provides structured error types for the platform adapter, the cluster
//! read/write boundary and the reconciliation driver.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Sync timed out after {0:?}")]
    Timeout(Duration),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Write conflict on {kind}/{name}: resource changed since it was read")]
    ClusterWriteConflict { kind: String, name: String },

    #[error("Node {node} does not report a system UUID")]
    NodeMissingSystemUuid { node: String },

    // =========================================================================
    // Platform Errors
    // =========================================================================
    #[error("oVirt platform unavailable: {reason}")]
    PlatformUnavailable { reason: String },

    #[error("oVirt {kind} not found: {id}")]
    PlatformNotFound { kind: String, id: String },

    #[error("Disk {disk_id} does not reference any storage domain")]
    NoStorageDomain { disk_id: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::PlatformUnavailable { .. }
            | Error::PlatformNotFound { .. }
            | Error::Kube(_)
            | Error::ClusterWriteConflict { .. }
            | Error::Timeout(_) => ErrorAction::RequeueWithBackoff,

            // Platform data problems rarely fix themselves quickly
            Error::NoStorageDomain { .. } | Error::NodeMissingSystemUuid { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Shutdown or bad configuration - don't retry automatically
            Error::Cancelled | Error::Configuration(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::PlatformUnavailable { .. }
                | Error::Kube(_)
                | Error::ClusterWriteConflict { .. }
                | Error::Timeout(_)
        )
    }

    /// Classify a kube API error, mapping optimistic-concurrency failures
    /// (HTTP 409 with reason `Conflict`) to [`Error::ClusterWriteConflict`].
    pub fn from_kube_write(err: kube::Error, kind: &str, name: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "Conflict" => {
                Error::ClusterWriteConflict {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            _ => Error::Kube(err),
        }
    }
}

/// Whether a kube error is an HTTP 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
