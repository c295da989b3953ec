//! Remote inventory client for the Rancher v3 management API.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, trace};

use rancher_exporter_common::{NodeRole, NodeSample, ResourceKind};

use crate::config::{ConfigError, RancherConfig};

/// Page size requested from the API.
const PAGE_LIMIT: &str = "1000";

/// Maximum number of bytes of an error body kept in [`UpstreamError::Status`].
const MAX_ERROR_BODY: usize = 256;

/// Errors returned by an inventory listing.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unexpected response: {0}")]
    Protocol(String),
}

/// Node details carried by a node listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub cluster_id: String,
    pub node_name: String,
    pub worker: bool,
    pub cpu_count: i64,
    pub memory_total_kib: i64,
}

impl NodeRecord {
    /// Convert into a sample, deriving the role from the worker flag.
    pub fn to_sample(&self) -> NodeSample {
        NodeSample::new(
            self.cluster_id.clone(),
            self.node_name.clone(),
            NodeRole::from_worker_flag(self.worker),
            self.cpu_count,
            self.memory_total_kib,
        )
    }
}

/// One record of a resource listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRecord {
    /// Resource identifier.
    pub id: String,
    /// Node details, present for node listings.
    pub node: Option<NodeRecord>,
}

impl InventoryRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node: None,
        }
    }

    pub fn node(id: impl Into<String>, node: NodeRecord) -> Self {
        Self {
            id: id.into(),
            node: Some(node),
        }
    }
}

/// Read-only access to the control plane inventory.
///
/// `list_all` returns every record of a kind, across all pages, or an error.
/// Implementations never hand out partial pages.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn list_all(&self, kind: ResourceKind) -> Result<Vec<InventoryRecord>, UpstreamError>;
}

/// Shareable client handle.
pub type SharedClient = Arc<dyn InventoryClient>;

/// Collection envelope returned by the management API.
#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    #[serde(default)]
    id: String,
    #[serde(default)]
    cluster_id: Option<String>,
    #[serde(default)]
    node_name: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    worker: Option<bool>,
    #[serde(default)]
    info: Option<RawNodeInfo>,
}

#[derive(Debug, Deserialize)]
struct RawNodeInfo {
    #[serde(default)]
    cpu: Option<RawCpu>,
    #[serde(default)]
    memory: Option<RawMemory>,
}

#[derive(Debug, Deserialize)]
struct RawCpu {
    #[serde(default)]
    count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawMemory {
    #[serde(default, rename = "memTotalKiB")]
    mem_total_kib: Option<i64>,
}

impl RawNode {
    fn into_record(self) -> InventoryRecord {
        let node_name = [self.node_name, self.hostname, self.name]
            .into_iter()
            .flatten()
            .find(|n| !n.is_empty())
            .unwrap_or_else(|| self.id.clone());
        let (cpu_count, memory_total_kib) = match &self.info {
            Some(info) => (
                info.cpu.as_ref().and_then(|c| c.count).unwrap_or(0),
                info.memory.as_ref().and_then(|m| m.mem_total_kib).unwrap_or(0),
            ),
            None => (0, 0),
        };

        let node = NodeRecord {
            cluster_id: self.cluster_id.unwrap_or_default(),
            node_name,
            worker: self.worker.unwrap_or(false),
            cpu_count,
            memory_total_kib,
        };
        InventoryRecord::node(self.id, node)
    }
}

/// HTTP client for the Rancher v3 management API.
#[derive(Debug, Clone)]
pub struct RancherClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    cluster_id: Option<String>,
}

impl RancherClient {
    /// Build a client from connection settings.
    pub fn new(config: &RancherConfig) -> Result<Self, ConfigError> {
        if config.url.trim().is_empty() {
            return Err(ConfigError::Missing("RANCHER_URL"));
        }
        if config.token.trim().is_empty() {
            return Err(ConfigError::Missing("RANCHER_TOKEN"));
        }

        let base_url = parse_base_url(&config.url)?;

        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("rancher-exporter/", env!("CARGO_PKG_VERSION")));

        if let Some(ca_cert) = &config.ca_cert {
            let pem = read_ca_pem(ca_cert)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| ConfigError::Invalid {
                name: "RANCHER_CACERT",
                reason: e.to_string(),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().map_err(|e| ConfigError::Invalid {
            name: "rancher",
            reason: e.to_string(),
        })?;

        Ok(Self {
            http,
            base_url,
            token: config.token.clone(),
            cluster_id: config.cluster_id.clone(),
        })
    }

    /// Base URL of the v3 API, always ending with `/v3/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// First page URL for a kind.
    fn collection_url(&self, kind: ResourceKind) -> Result<Url, UpstreamError> {
        let mut url = self
            .base_url
            .join(kind.collection())
            .map_err(|e| UpstreamError::Protocol(format!("invalid collection URL: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", PAGE_LIMIT);
            if let Some(cluster_id) = &self.cluster_id
                && matches!(kind, ResourceKind::Node | ResourceKind::Project)
            {
                query.append_pair("clusterId", cluster_id);
            }
        }

        Ok(url)
    }

    /// Fetch every page of a collection.
    async fn list_pages<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
    ) -> Result<Vec<T>, UpstreamError> {
        let mut next = Some(self.collection_url(kind)?);
        let mut items = Vec::new();
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            let page: Collection<T> = self.get_page(&url).await?;
            pages += 1;
            items.extend(page.data);

            if let Some(link) = page.pagination.and_then(|p| p.next)
                && !link.is_empty()
            {
                let link = url.join(&link).map_err(|e| {
                    UpstreamError::Protocol(format!("invalid pagination link {link:?}: {e}"))
                })?;
                if link == url {
                    return Err(UpstreamError::Protocol(format!(
                        "pagination link for {} points to itself",
                        kind.collection()
                    )));
                }
                next = Some(link);
            }
        }

        trace!(kind = %kind, pages, items = items.len(), "Listed collection");
        Ok(items)
    }

    async fn get_page<T: DeserializeOwned>(&self, url: &Url) -> Result<T, UpstreamError> {
        let response = self
            .http
            .get(url.clone())
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| UpstreamError::Request {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| UpstreamError::Request {
            url: url.to_string(),
            source: e,
        })?;

        if !status.is_success() {
            let body: String = String::from_utf8_lossy(&body)
                .chars()
                .take(MAX_ERROR_BODY)
                .collect();
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode {
            url: url.to_string(),
            source: e,
        })
    }
}

#[async_trait]
impl InventoryClient for RancherClient {
    async fn list_all(&self, kind: ResourceKind) -> Result<Vec<InventoryRecord>, UpstreamError> {
        let start = Instant::now();

        let records = match kind {
            ResourceKind::Node => self
                .list_pages::<RawNode>(kind)
                .await?
                .into_iter()
                .map(RawNode::into_record)
                .collect::<Vec<_>>(),
            _ => self
                .list_pages::<RawResource>(kind)
                .await?
                .into_iter()
                .map(|r| InventoryRecord::new(r.id))
                .collect(),
        };

        debug!(
            kind = %kind,
            count = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Listed Rancher resources"
        );
        Ok(records)
    }
}

/// Parse the configured URL into the `/v3/` API root.
///
/// Accepts both `https://host` and `https://host/v3`.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "RANCHER_URL",
        reason,
    };

    let mut url = Url::parse(raw.trim()).map_err(|e| invalid(format!("{raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }

    let path = url.path().trim_end_matches('/').to_string();
    let path = if path.ends_with("/v3") {
        format!("{path}/")
    } else {
        format!("{path}/v3/")
    };
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Accept PEM text directly, otherwise treat the value as a file path.
fn read_ca_pem(value: &str) -> Result<Vec<u8>, ConfigError> {
    if value.contains("-----BEGIN") {
        return Ok(value.as_bytes().to_vec());
    }

    std::fs::read(value).map_err(|e| ConfigError::Invalid {
        name: "RANCHER_CACERT",
        reason: format!("failed to read {value:?}: {e}"),
    })
}
