//! Rancher Exporter Common Library
//!
//! This crate provides shared types and utilities for the Rancher Prometheus exporter:
//!
//! - [`inventory`] - Inventory data model (`ResourceKind`, `NodeRole`, `NodeSample`, `Snapshot`)
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod inventory;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, load_config, normalize_log_level, parse_config};
pub use error::{Error, Result};
pub use inventory::{NodeRole, NodeSample, ResourceKind, Snapshot};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// # Example
///
/// ```ignore
/// use rancher_exporter_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = normalize_log_level(&config.level).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    if normalize_log_level(&config.level).is_none() {
        tracing::warn!(level = %config.level, "Unknown log level, falling back to info");
    }

    Ok(())
}
