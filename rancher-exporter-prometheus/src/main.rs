//! Prometheus exporter for Rancher inventory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use rancher_exporter_common::{LoggingConfig, init_tracing};
use rancher_exporter_prometheus::scrape::run_refresh_loop;
use rancher_exporter_prometheus::{
    ExporterConfig, HttpServer, MetricRegistry, Overrides, RancherClient, ScrapeMode,
    SnapshotCollector,
};
use rancher_exporter_prometheus::config::env::LOG_LEVEL;

/// Prometheus exporter for Rancher inventory.
#[derive(Parser, Debug)]
#[command(name = "rancher-exporter-prometheus")]
#[command(about = "Export Rancher inventory counts as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config and PORT).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides LOG_LEVEL.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Resolve configuration: defaults, file, environment, CLI
    let overrides = Overrides {
        listen: args.listen.clone(),
        log_level: args.log_level.clone(),
    };
    let config = match ExporterConfig::resolve(
        args.config.as_deref().map(Path::new),
        |name| std::env::var(name).ok(),
        overrides,
    ) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&fallback_logging(&args))?;
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    // Initialize logging
    init_tracing(&config.logging)?;

    info!("Starting Rancher Prometheus Exporter");

    let client = RancherClient::new(&config.rancher).inspect_err(|e| {
        error!(error = %e, "Invalid Rancher connection settings");
    })?;
    info!(
        url = %client.base_url(),
        cluster_id = config.rancher.cluster_id.as_deref().unwrap_or("-"),
        project_id = config.rancher.project_id.as_deref().unwrap_or("-"),
        "Rancher client configured"
    );

    let registry = Arc::new(MetricRegistry::new(&config.collection));
    let collector = Arc::new(SnapshotCollector::new(Arc::new(client), &config.collection));

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start background refresh if configured
    let (mode, refresh_task) = match config.collection.refresh_interval() {
        Some(interval) => {
            let task_collector = collector.clone();
            let task_registry = registry.clone();
            let task_shutdown = shutdown_rx.clone();
            let task = tokio::spawn(async move {
                run_refresh_loop(&task_collector, &task_registry, interval, task_shutdown).await;
            });
            (ScrapeMode::Cached, Some(task))
        }
        None => (ScrapeMode::OnScrape(collector.clone()), None),
    };

    // Bind before spawning so a busy port fails startup
    let listen_addr = config
        .listen_addr()
        .inspect_err(|e| error!(error = %e, "Invalid listen address"))?;
    let http_server = HttpServer::bind(
        registry.clone(),
        mode,
        listen_addr,
        config.prometheus.path.clone(),
    )
    .await
    .inspect_err(|e| error!(error = %e, "Failed to start HTTP server"))?;

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = http_task.await;
        if let Some(task) = refresh_task {
            let _ = task.await;
        }
    })
    .await;

    // Print final stats
    let stats = registry.stats();
    info!(
        scrapes_total = stats.scrapes_total,
        scrape_failures_total = stats.scrape_failures_total,
        node_series = registry.node_series_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Logging settings used to report a configuration that failed to resolve.
fn fallback_logging(args: &Args) -> LoggingConfig {
    let level = args
        .log_level
        .clone()
        .or_else(|| std::env::var(LOG_LEVEL).ok().filter(|v| !v.trim().is_empty()));

    LoggingConfig {
        level: level.unwrap_or_else(|| LoggingConfig::default().level),
        ..Default::default()
    }
}

/// Resolve when SIGTERM arrives; never on non-unix targets.
async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
