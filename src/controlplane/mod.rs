//! Control Plane Module
//!
//! The controllers that keep the oVirt StorageClass and the operator's
//! upgradeability in line with the platform, plus the driver that schedules
//! them and the adapters they talk through.

pub mod cluster;
pub mod conditions;
pub mod driver;
pub mod eol;
pub mod metrics;
pub mod orchestrator;
pub mod platform;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod storage_class;

pub use driver::{DriverConfig, Reconciler, SyncWorker, TriggerHandle};
pub use eol::{EolController, EolState};
pub use metrics::SyncMetrics;
pub use orchestrator::*;
pub use platform::*;
pub use resolver::StorageDomainResolver;
pub use retry::ConflictRetry;
pub use state::StorageClassState;
pub use storage_class::{StorageClassController, StorageClassPolicy, SyncOutcome};
