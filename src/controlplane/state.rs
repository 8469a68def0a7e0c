//! Storage class management state
//!
//! Maps the management state declared on the ClusterCSIDriver to what the
//! storage class controller is allowed to do.

use crate::crd::ManagementState;
use serde::{Deserialize, Serialize};

/// What the controller may do with the storage class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClassState {
    /// Create it and keep it in sync with the platform
    Managed,
    /// Create it if missing, otherwise leave it alone
    Unmanaged,
    /// Delete it and never recreate it
    Removed,
}

impl std::fmt::Display for StorageClassState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageClassState::Managed => write!(f, "managed"),
            StorageClassState::Unmanaged => write!(f, "unmanaged"),
            StorageClassState::Removed => write!(f, "removed"),
        }
    }
}

/// Derive the storage class state from the declared management state.
/// An absent declaration means managed; `Force` behaves like `Managed`.
pub fn evaluate(management_state: Option<ManagementState>) -> StorageClassState {
    match management_state {
        None | Some(ManagementState::Managed) | Some(ManagementState::Force) => {
            StorageClassState::Managed
        }
        Some(ManagementState::Unmanaged) => StorageClassState::Unmanaged,
        Some(ManagementState::Removed) => StorageClassState::Removed,
    }
}

/// Whether the storage class should track the platform topology
pub fn is_managed(state: StorageClassState) -> bool {
    state == StorageClassState::Managed
}
