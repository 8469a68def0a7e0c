//! oVirt Platform Adapter
//!
//! Talks to the oVirt engine REST API (`/ovirt-engine/api`) using the JSON
//! representation and SSO bearer tokens. Only the read operations needed
//! to find a VM's boot storage domain are implemented.

use crate::domain::ports::{
    Disk, DiskAttachment, PlatformClient, PlatformClientRef, PlatformConnector, StorageDomain,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Where the credentials secret is mounted by default
pub const DEFAULT_CONFIG_PATH: &str = "/tmp/config/ovirt-config.yaml";

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the oVirt engine
#[derive(Clone, Deserialize)]
pub struct OvirtConfig {
    /// Engine API URL, e.g. `https://engine.example.com/ovirt-engine/api`
    #[serde(rename = "ovirt_url")]
    pub url: String,
    #[serde(rename = "ovirt_username")]
    pub username: String,
    #[serde(rename = "ovirt_password", default)]
    pub password: String,
    /// Path to a PEM file with the engine CA
    #[serde(rename = "ovirt_cafile", default)]
    pub ca_file: Option<String>,
    /// Inline PEM with the engine CA; takes precedence over `ca_file`
    #[serde(rename = "ovirt_ca_bundle", default)]
    pub ca_bundle: Option<String>,
    /// Skip TLS verification
    #[serde(rename = "ovirt_insecure", default)]
    pub insecure: bool,
    #[serde(skip, default = "default_request_timeout")]
    pub request_timeout: Duration,
}

impl std::fmt::Debug for OvirtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OvirtConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ca_file", &self.ca_file)
            .field("ca_bundle", &self.ca_bundle.as_ref().map(|_| "<pem>"))
            .field("insecure", &self.insecure)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl OvirtConfig {
    /// Load and validate the YAML credentials file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("reading oVirt config {}: {}", path.display(), e))
        })?;
        let config: OvirtConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that cannot possibly connect
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Configuration("ovirt_url must be set".into()));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Configuration("ovirt_username must be set".into()));
        }
        Ok(())
    }

    /// API base URL without a trailing slash
    pub fn api_url(&self) -> String {
        self.url.trim_end_matches('/').to_string()
    }

    /// SSO token endpoint, a sibling of the `api` path
    pub fn sso_url(&self) -> String {
        let api = self.api_url();
        let engine = api.strip_suffix("/api").unwrap_or(&api);
        format!("{}/sso/oauth/token", engine)
    }

    /// CA certificate material, if configured
    pub fn ca_pem(&self) -> Result<Option<Vec<u8>>> {
        if let Some(bundle) = self.ca_bundle.as_deref().filter(|b| !b.trim().is_empty()) {
            return Ok(Some(bundle.as_bytes().to_vec()));
        }
        match self.ca_file.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    Error::Configuration(format!("reading oVirt CA file {}: {}", path, e))
                })?;
                Ok(Some(pem))
            }
            None => Ok(None),
        }
    }
}

// =============================================================================
// oVirt JSON Representations
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct DiskAttachmentList {
    #[serde(default)]
    disk_attachment: Vec<DiskAttachmentRepr>,
}

#[derive(Debug, Deserialize)]
struct DiskAttachmentRepr {
    #[serde(default)]
    id: String,
    #[serde(default, deserialize_with = "flexible_bool")]
    bootable: bool,
    #[serde(default)]
    disk: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct DiskRepr {
    id: String,
    #[serde(default)]
    storage_domains: Option<StorageDomainList>,
}

#[derive(Debug, Deserialize)]
struct StorageDomainList {
    #[serde(default)]
    storage_domain: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct StorageDomainRepr {
    id: String,
    name: String,
}

impl From<DiskAttachmentRepr> for DiskAttachment {
    fn from(repr: DiskAttachmentRepr) -> Self {
        DiskAttachment {
            id: repr.id,
            bootable: repr.bootable,
            disk_id: repr.disk.map(|d| d.id).unwrap_or_default(),
        }
    }
}

impl From<DiskRepr> for Disk {
    fn from(repr: DiskRepr) -> Self {
        Disk {
            id: repr.id,
            storage_domain_ids: repr
                .storage_domains
                .map(|l| l.storage_domain.into_iter().map(|d| d.id).collect())
                .unwrap_or_default(),
        }
    }
}

/// The engine encodes booleans as strings (`"true"`)
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Bool(bool),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Bool(b) => Ok(b),
        Repr::Text(s) => s.parse::<bool>().map_err(serde::de::Error::custom),
    }
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> Error {
    Error::PlatformUnavailable {
        reason: format!("{}: {}", context, err),
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens authenticated sessions against the engine
pub struct OvirtConnector {
    config: OvirtConfig,
    http: reqwest::Client,
}

impl OvirtConnector {
    /// Create a connector, building the TLS-configured HTTP client once
    pub fn new(config: OvirtConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.request_timeout);

        if let Some(pem) = config.ca_pem()? {
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::Configuration(format!("invalid oVirt CA: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::Configuration(format!("building HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    async fn request_token(&self) -> Result<String> {
        let url = self.config.sso_url();
        debug!(url = %url, "Requesting oVirt SSO token");

        let params = [
            ("grant_type", "password"),
            ("scope", "ovirt-app-api"),
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let resp = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| unavailable("SSO request failed", e))?;

        let status = resp.status();
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| unavailable("decoding SSO response", e))?;

        match (status.is_success(), body.access_token) {
            (true, Some(token)) if !token.is_empty() => Ok(token),
            _ => Err(Error::PlatformUnavailable {
                reason: format!(
                    "SSO authentication failed ({}): {}",
                    status,
                    body.error.unwrap_or_else(|| "no access token returned".into())
                ),
            }),
        }
    }
}

#[async_trait]
impl PlatformConnector for OvirtConnector {
    async fn connect(&self) -> Result<PlatformClientRef> {
        let token = self.request_token().await?;
        info!(url = %self.config.api_url(), "Connected to oVirt engine");

        Ok(Arc::new(OvirtClient {
            http: self.http.clone(),
            api_url: self.config.api_url(),
            token,
        }))
    }
}

// =============================================================================
// Client
// =============================================================================

/// An authenticated session against the engine API
pub struct OvirtClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl OvirtClient {
    async fn get_json<T: DeserializeOwned>(&self, path: &str, kind: &str, id: &str) -> Result<T> {
        let url = format!("{}/{}", self.api_url, path);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| unavailable(&format!("GET {}", url), e))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(Error::PlatformNotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            }),
            status if !status.is_success() => Err(Error::PlatformUnavailable {
                reason: format!("GET {} returned {}", url, status),
            }),
            _ => resp
                .json::<T>()
                .await
                .map_err(|e| unavailable(&format!("decoding {} {}", kind, id), e)),
        }
    }
}

#[async_trait]
impl PlatformClient for OvirtClient {
    async fn list_disk_attachments(&self, vm_id: &str) -> Result<Vec<DiskAttachment>> {
        let list: DiskAttachmentList = self
            .get_json(&format!("vms/{}/diskattachments", vm_id), "vm", vm_id)
            .await?;

        Ok(list.disk_attachment.into_iter().map(Into::into).collect())
    }

    async fn fetch_disk(&self, disk_id: &str) -> Result<Disk> {
        if disk_id.is_empty() {
            return Err(Error::PlatformNotFound {
                kind: "disk".into(),
                id: String::new(),
            });
        }

        let disk: DiskRepr = self
            .get_json(&format!("disks/{}", disk_id), "disk", disk_id)
            .await?;
        Ok(disk.into())
    }

    async fn fetch_storage_domain(&self, domain_id: &str) -> Result<StorageDomain> {
        let sd: StorageDomainRepr = self
            .get_json(
                &format!("storagedomains/{}", domain_id),
                "storage domain",
                domain_id,
            )
            .await?;

        Ok(StorageDomain {
            id: sd.id,
            name: sd.name,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .http
            .get(&self.api_url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| unavailable("health check", e))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::PlatformUnavailable {
                reason: format!("health check returned {}", resp.status()),
            })
        }
    }
}
