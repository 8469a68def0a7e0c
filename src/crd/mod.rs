//! Custom Resource Definitions consumed by the operator
//!
//! - ClusterCSIDriver: management state and status conditions of the driver

pub mod cluster_csi_driver;

pub use cluster_csi_driver::*;
