//! ClusterCSIDriver CRD
//!
//! The OpenShift operator resource (`operator.openshift.io/v1`) that carries the
//! management state of the oVirt CSI driver and the operator's status
//! conditions. Only the fields this operator reads or writes are modelled.

use chrono::{DateTime, SubsecRound, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the ClusterCSIDriver instance owned by this operator
pub const INSTANCE_NAME: &str = "csi.ovirt.org";

// =============================================================================
// ClusterCSIDriver CRD
// =============================================================================

/// ClusterCSIDriver declares how the operator manages a CSI driver
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "ClusterCSIDriver",
    plural = "clustercsidrivers",
    status = "ClusterCSIDriverStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverSpec {
    /// Whether and how the operator should manage the component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_state: Option<ManagementState>,

    /// Intended verbosity of the operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Intended verbosity of the operator itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_log_level: Option<String>,
}

/// Status reported by the operator
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverStatus {
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Declared management policy of the operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ManagementState {
    Managed,
    Unmanaged,
    Removed,
    Force,
}

impl std::fmt::Display for ManagementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagementState::Managed => write!(f, "Managed"),
            ManagementState::Unmanaged => write!(f, "Unmanaged"),
            ManagementState::Removed => write!(f, "Removed"),
            ManagementState::Force => write!(f, "Force"),
        }
    }
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Operator condition, as defined by `operator.openshift.io/v1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperatorCondition {
    /// Build a condition stamped with the current time (second precision,
    /// matching what the API server stores)
    pub fn new(type_: &str, status: ConditionStatus, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            last_transition_time: Some(Utc::now().trunc_subsecs(0)),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl ClusterCSIDriver {
    /// Declared management state, if any
    pub fn management_state(&self) -> Option<ManagementState> {
        self.spec.management_state
    }

    /// Current status conditions
    pub fn conditions(&self) -> &[OperatorCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}
