//! Prometheus exporter for Rancher inventory.
//!
//! This crate queries the Rancher v3 management API for clusters, projects,
//! nodes, tokens and users, and exposes the counts and per-node capacity via
//! an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Rancher API   │────>│    Collector    │────>│    Registry     │────>│   HTTP Server   │
//! │   (/v3/...)     │     │   (snapshot)    │     │  (projection)   │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! By default every scrape triggers a fresh collection. With
//! `collection.refresh_interval_secs` set, a background task refreshes the
//! registry and scrapes only render it.
//!
//! # Usage
//!
//! ```bash
//! RANCHER_URL=https://rancher.example.com RANCHER_TOKEN=token-abc:secret \
//!     rancher-exporter-prometheus
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod client;
pub mod collector;
pub mod config;
pub mod http;
pub mod mapping;
pub mod registry;
pub mod scrape;

pub use client::{InventoryClient, InventoryRecord, NodeRecord, RancherClient, SharedClient, UpstreamError};
pub use collector::{CollectError, Collection, SnapshotCollector};
pub use config::{ConfigError, ExporterConfig, Overrides};
pub use http::{HttpServer, ScrapeMode};
pub use registry::{MetricRegistry, SharedRegistry};
