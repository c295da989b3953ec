//! Configuration for the Rancher exporter.
//!
//! Values are resolved in order: built-in defaults, optional JSON5 file,
//! environment variables, then command-line flags (applied by the binary).

use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use rancher_exporter_common::{LoggingConfig, load_config, parse_config};

/// Environment variables read by [`ExporterConfig::apply_env`].
pub mod env {
    pub const RANCHER_URL: &str = "RANCHER_URL";
    pub const RANCHER_TOKEN: &str = "RANCHER_TOKEN";
    pub const RANCHER_CACERT: &str = "RANCHER_CACERT";
    pub const RANCHER_CLUSTERID: &str = "RANCHER_CLUSTERID";
    pub const RANCHER_PROJECTID: &str = "RANCHER_PROJECTID";
    pub const RANCHER_INSECURE: &str = "RANCHER_INSECURE";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const PORT: &str = "PORT";
}

/// Paths served by fixed routes, unavailable to the metrics endpoint.
pub const RESERVED_PATHS: [&str; 3] = ["/", "/health", "/ready"];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] rancher_exporter_common::Error),
    #[error("Missing required parameter: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Command-line overrides, applied after the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub log_level: Option<String>,
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExporterConfig {
    /// Rancher connection settings.
    #[serde(default)]
    pub rancher: RancherConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Collection behaviour.
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rancher management API connection settings.
#[derive(Clone, Deserialize)]
pub struct RancherConfig {
    /// Base URL of the Rancher server (e.g., "https://rancher.example.com").
    #[serde(default)]
    pub url: String,

    /// API bearer token ("token-xxxxx:secret").
    #[serde(default)]
    pub token: String,

    /// CA certificate, either PEM text or a path to a PEM file.
    #[serde(default)]
    pub ca_cert: Option<String>,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,

    /// Restrict node and project listings to this cluster.
    #[serde(default)]
    pub cluster_id: Option<String>,

    /// Project identifier. Logged at startup only.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for RancherConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            ca_cert: None,
            insecure: false,
            cluster_id: None,
            project_id: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

impl RancherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// The token never shows up in logs.
impl fmt::Debug for RancherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RancherConfig")
            .field("url", &self.url)
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "<set>"))
            .field("insecure", &self.insecure)
            .field("cluster_id", &self.cluster_id)
            .field("project_id", &self.project_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// How resource counts are published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountSemantics {
    /// Overwrite with the latest count.
    #[default]
    Gauge,
    /// Add every observed count to a running total.
    Counter,
}

/// What a collection does when one resource listing fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// The first failure aborts the whole collection.
    #[default]
    FailFast,
    /// Keep whatever kinds succeeded.
    BestEffort,
}

/// Collection and projection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    pub count_semantics: CountSemantics,

    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Remove per-node series for nodes missing from the latest collection.
    #[serde(default = "default_prune_stale_nodes")]
    pub prune_stale_nodes: bool,

    /// Maximum number of concurrent upstream listings (1 = sequential).
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Upper bound for one collection (seconds).
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,

    /// Collect in the background at this interval instead of on every scrape.
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
}

fn default_prune_stale_nodes() -> bool {
    true
}

fn default_max_concurrent_requests() -> usize {
    5
}

fn default_scrape_timeout() -> u64 {
    10
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            count_semantics: CountSemantics::default(),
            failure_mode: FailureMode::default(),
            prune_stale_nodes: default_prune_stale_nodes(),
            max_concurrent_requests: default_max_concurrent_requests(),
            scrape_timeout_secs: default_scrape_timeout(),
            refresh_interval_secs: None,
        }
    }
}

impl CollectionConfig {
    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs.map(Duration::from_secs)
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the effective configuration.
    ///
    /// Built-in defaults, then the optional file, then the environment, then
    /// command-line overrides. The result is validated.
    pub fn resolve<F>(
        path: Option<&Path>,
        lookup: F,
        overrides: Overrides,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;

        if let Some(listen) = overrides.listen {
            config.prometheus.listen = listen;
        }
        if let Some(level) = overrides.log_level {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Override values from an environment lookup.
    ///
    /// Empty variables count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(env::RANCHER_URL) {
            self.rancher.url = url;
        }
        if let Some(token) = get(env::RANCHER_TOKEN) {
            self.rancher.token = token;
        }
        if let Some(ca_cert) = get(env::RANCHER_CACERT) {
            self.rancher.ca_cert = Some(ca_cert);
        }
        if let Some(cluster_id) = get(env::RANCHER_CLUSTERID) {
            self.rancher.cluster_id = Some(cluster_id);
        }
        if let Some(project_id) = get(env::RANCHER_PROJECTID) {
            self.rancher.project_id = Some(project_id);
        }
        if let Some(insecure) = get(env::RANCHER_INSECURE) {
            self.rancher.insecure = parse_bool(&insecure)
                .ok_or_else(|| ConfigError::invalid(env::RANCHER_INSECURE, insecure.clone()))?;
        }
        if let Some(level) = get(env::LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(port) = get(env::PORT) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(env::PORT, format!("{port:?}: {e}")))?;
            self.set_port(port)?;
        }

        Ok(())
    }

    /// Replace the port of the listen address.
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let mut addr = self.listen_addr()?;
        addr.set_port(port);
        self.prometheus.listen = addr.to_string();
        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.prometheus.listen.parse().map_err(|_| {
            ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            ))
        })
    }

    /// Validate the configuration.
    ///
    /// Connection parameters are checked when the Rancher client is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if RESERVED_PATHS.contains(&self.prometheus.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path must not be {} (reserved)",
                self.prometheus.path
            )));
        }

        if self.prometheus.path.contains([':', '*']) {
            return Err(ConfigError::Validation(format!(
                "Metrics path must not contain ':' or '*': {}",
                self.prometheus.path
            )));
        }

        if self.collection.max_concurrent_requests == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_requests must be > 0".to_string(),
            ));
        }

        if self.collection.scrape_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "scrape_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.collection.refresh_interval_secs == Some(0) {
            return Err(ConfigError::Validation(
                "refresh_interval_secs must be > 0".to_string(),
            ));
        }

        if self.rancher.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "rancher timeout_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
