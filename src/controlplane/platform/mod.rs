//! Platform Adapters
//!
//! Provides the oVirt engine adapter and the factory that hands out
//! health-checked clients.

pub mod ovirt;

pub use ovirt::*;

use crate::domain::ports::{PlatformClientRef, PlatformConnectorRef};
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Factory for platform clients
///
/// Every call to [`PlatformFactory::client`] returns a handle that has just
/// passed a health check, reconnecting first when the cached session is gone
/// or broken.
pub struct PlatformFactory {
    connector: PlatformConnectorRef,
    current: Mutex<Option<PlatformClientRef>>,
}

impl PlatformFactory {
    /// Create a factory around any connector
    pub fn new(connector: PlatformConnectorRef) -> Self {
        Self {
            connector,
            current: Mutex::new(None),
        }
    }

    /// Create a factory for the oVirt engine described by `config`
    pub fn ovirt(config: OvirtConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(OvirtConnector::new(config)?)))
    }

    /// Get a ready client, reconnecting if needed
    pub async fn client(&self) -> Result<PlatformClientRef> {
        let mut current = self.current.lock().await;

        if let Some(client) = current.as_ref() {
            match client.health_check().await {
                Ok(()) => {
                    debug!("Reusing healthy platform session");
                    return Ok(client.clone());
                }
                Err(e) => {
                    warn!(error = %e, "Platform session failed health check, reconnecting");
                    *current = None;
                }
            }
        }

        let client = self.connector.connect().await?;
        *current = Some(client.clone());
        Ok(client)
    }
}
