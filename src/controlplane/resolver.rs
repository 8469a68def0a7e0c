//! Storage Domain Resolver
//!
//! Finds the storage domain holding a VM's boot disk:
//! attachments -> first bootable attachment -> disk -> first storage domain.

use crate::controlplane::platform::PlatformFactory;
use crate::domain::ports::PlatformClient;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Resolves node IDs to storage domain names through the platform factory
pub struct StorageDomainResolver {
    platform: Arc<PlatformFactory>,
}

impl StorageDomainResolver {
    pub fn new(platform: Arc<PlatformFactory>) -> Self {
        Self { platform }
    }

    /// Name of the storage domain backing the boot disk of `node_id`, or an
    /// empty string when the VM has no bootable disk attached yet
    #[instrument(skip(self))]
    pub async fn resolve(&self, node_id: &str) -> Result<String> {
        let client = self.platform.client().await?;
        resolve_with(client.as_ref(), node_id).await
    }
}

/// Resolution against an already-connected client. Platform errors are
/// returned unchanged; retrying is the caller's concern.
pub async fn resolve_with(client: &dyn PlatformClient, node_id: &str) -> Result<String> {
    let attachments = client.list_disk_attachments(node_id).await?;

    let Some(boot) = attachments.iter().find(|a| a.bootable) else {
        info!(node_id, "No bootable disk attached, storage domain left empty");
        return Ok(String::new());
    };

    let disk = client.fetch_disk(&boot.disk_id).await?;
    debug!(disk = %disk.id, "Extracting storage domain from boot disk");

    let domain_id = disk
        .storage_domain_ids
        .first()
        .ok_or_else(|| Error::NoStorageDomain {
            disk_id: disk.id.clone(),
        })?;

    let domain = client.fetch_storage_domain(domain_id).await?;
    info!(domain = %domain.name, "Fetched storage domain");

    Ok(domain.name)
}
