//! Glue between collection and projection: one refresh, and the background loop.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::collector::{CollectError, SnapshotCollector};
use crate::registry::MetricRegistry;

/// Collect a snapshot and project it onto the registry.
///
/// On failure the registry keeps its previous values; only the failure
/// statistics change. The full error is logged here, callers only report a
/// generic message.
pub async fn refresh(
    collector: &SnapshotCollector,
    registry: &MetricRegistry,
) -> Result<(), CollectError> {
    let start = Instant::now();

    match collector.collect().await {
        Ok(collection) => {
            for failure in collection.failures() {
                warn!(
                    kind = %failure.kind,
                    error = %failure.error,
                    "Publishing partial snapshot, kind keeps last known value"
                );
            }
            registry.project(collection.snapshot());
            registry.record_success(start.elapsed());
            Ok(())
        }
        Err(e) => {
            registry.record_failure(start.elapsed());
            if e.is_timeout() {
                error!(error = %e, "Timed out collecting Rancher inventory");
            } else {
                error!(error = %e, "Failed to get the data count");
            }
            Err(e)
        }
    }
}

/// Refresh at a fixed interval until shutdown is signalled.
pub async fn run_refresh_loop(
    collector: &SnapshotCollector,
    registry: &MetricRegistry,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "Starting background refresh");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Errors are logged and counted by refresh().
                let _ = refresh(collector, registry).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Background refresh stopped");
}
