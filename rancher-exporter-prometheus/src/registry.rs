//! Metric registry holding the last projected snapshot and rendering it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::debug;

use rancher_exporter_common::{NodeRole, ResourceKind, Snapshot};

use crate::config::{CollectionConfig, CountSemantics};
use crate::mapping::{
    CPU_COUNT_HELP, CPU_COUNT_METRIC, LAST_DURATION_METRIC, LAST_SUCCESS_METRIC,
    MEMORY_COUNT_HELP, MEMORY_COUNT_METRIC, NODE_LABELS, PrometheusType, SCRAPE_FAILURES_METRIC,
    SCRAPES_METRIC, format_value, write_header, write_sample,
};

/// Identifies one per-node series: (cluster, node, role).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub cluster: String,
    pub node: String,
    pub role: NodeRole,
}

impl NodeKey {
    pub fn new(cluster: impl Into<String>, node: impl Into<String>, role: NodeRole) -> Self {
        Self {
            cluster: cluster.into(),
            node: node.into(),
            role,
        }
    }

    fn labels(&self) -> [(&str, &str); 3] {
        [
            (NODE_LABELS[0], self.cluster.as_str()),
            (NODE_LABELS[1], self.node.as_str()),
            (NODE_LABELS[2], self.role.as_str()),
        ]
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    counts: BTreeMap<ResourceKind, u64>,
    cpu: BTreeMap<NodeKey, i64>,
    memory: BTreeMap<NodeKey, i64>,
    projections: u64,
}

/// Exporter statistics.
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    /// Scrapes (or background refreshes) attempted.
    pub scrapes_total: u64,
    /// Attempts that failed to collect.
    pub scrape_failures_total: u64,
    /// Duration of the last attempt.
    pub last_scrape_duration: Option<Duration>,
    /// Wall-clock time of the last successful projection.
    pub last_success: Option<SystemTime>,
}

/// Thread-safe registry of the published metrics.
///
/// [`MetricRegistry::project`] applies a whole snapshot under one write lock
/// and [`MetricRegistry::render`] reads under one read lock, so a render never
/// sees half of a projection.
pub struct MetricRegistry {
    state: RwLock<RegistryState>,
    stats: RwLock<ExporterStats>,
    count_semantics: CountSemantics,
    prune_stale_nodes: bool,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(&CollectionConfig::default())
    }
}

impl MetricRegistry {
    /// Create an empty registry. All counts start at zero.
    pub fn new(config: &CollectionConfig) -> Self {
        let state = RegistryState {
            counts: ResourceKind::ALL.iter().map(|k| (*k, 0)).collect(),
            ..Default::default()
        };

        Self {
            state: RwLock::new(state),
            stats: RwLock::new(ExporterStats::default()),
            count_semantics: config.count_semantics,
            prune_stale_nodes: config.prune_stale_nodes,
        }
    }

    pub fn count_semantics(&self) -> CountSemantics {
        self.count_semantics
    }

    /// Apply a snapshot. Returns the number of per-node series removed.
    ///
    /// Kinds missing from a partial snapshot keep their previous values.
    pub fn project(&self, snapshot: &Snapshot) -> usize {
        let samples = snapshot.node_samples().map(|samples| {
            samples
                .iter()
                .map(|s| {
                    (
                        NodeKey::new(s.cluster_id.clone(), s.node_name.clone(), s.role),
                        s.cpu_count,
                        s.memory_total_kib,
                    )
                })
                .collect::<Vec<_>>()
        });

        let mut state = self.state.write();

        for kind in snapshot.kinds() {
            let Some(value) = snapshot.count(kind) else {
                continue;
            };
            let entry = state.counts.entry(kind).or_insert(0);
            match self.count_semantics {
                CountSemantics::Gauge => *entry = value,
                CountSemantics::Counter => *entry = entry.saturating_add(value),
            }
        }

        let mut removed = 0;
        if let Some(samples) = samples {
            if self.prune_stale_nodes {
                let current: BTreeSet<&NodeKey> = samples.iter().map(|(k, _, _)| k).collect();
                let before = state.cpu.len() + state.memory.len();
                state.cpu.retain(|k, _| current.contains(k));
                state.memory.retain(|k, _| current.contains(k));
                removed = before - (state.cpu.len() + state.memory.len());
            }

            for (key, cpu, memory) in samples {
                state.cpu.insert(key.clone(), cpu);
                state.memory.insert(key, memory);
            }
        }

        state.projections += 1;
        let series = state.cpu.len();
        drop(state);

        debug!(
            kinds = snapshot.kinds().count(),
            node_series = series,
            removed,
            "Projected snapshot"
        );

        removed
    }

    /// Record a successful scrape or refresh.
    pub fn record_success(&self, duration: Duration) {
        let mut stats = self.stats.write();
        stats.scrapes_total += 1;
        stats.last_scrape_duration = Some(duration);
        stats.last_success = Some(SystemTime::now());
    }

    /// Record a failed scrape or refresh.
    pub fn record_failure(&self, duration: Duration) {
        let mut stats = self.stats.write();
        stats.scrapes_total += 1;
        stats.scrape_failures_total += 1;
        stats.last_scrape_duration = Some(duration);
    }

    /// Current value of a count metric.
    pub fn count(&self, kind: ResourceKind) -> u64 {
        self.state.read().counts.get(&kind).copied().unwrap_or(0)
    }

    /// CPU and memory values of a node series, if present.
    pub fn node_values(&self, key: &NodeKey) -> Option<(i64, i64)> {
        let state = self.state.read();
        Some((*state.cpu.get(key)?, *state.memory.get(key)?))
    }

    /// Number of per-node series currently published.
    pub fn node_series_count(&self) -> usize {
        self.state.read().cpu.len()
    }

    /// Whether at least one snapshot has been projected.
    pub fn has_data(&self) -> bool {
        self.state.read().projections > 0
    }

    /// Get exporter statistics.
    pub fn stats(&self) -> ExporterStats {
        self.stats.read().clone()
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        let state = self.state.read();
        let mut output = String::with_capacity(1024 + state.cpu.len() * 200);

        let count_type = match self.count_semantics {
            CountSemantics::Gauge => PrometheusType::Gauge,
            CountSemantics::Counter => PrometheusType::Counter,
        };
        for kind in ResourceKind::ALL {
            let value = state.counts.get(&kind).copied().unwrap_or(0);
            write_header(&mut output, kind.count_metric(), kind.count_help(), count_type);
            write_sample(&mut output, kind.count_metric(), &[], value);
        }

        for (name, help, series) in [
            (CPU_COUNT_METRIC, CPU_COUNT_HELP, &state.cpu),
            (MEMORY_COUNT_METRIC, MEMORY_COUNT_HELP, &state.memory),
        ] {
            if series.is_empty() {
                continue;
            }
            write_header(&mut output, name, help, PrometheusType::Gauge);
            for (key, value) in series {
                write_sample(&mut output, name, &key.labels(), value);
            }
        }
        drop(state);

        // Exporter statistics
        let stats = self.stats.read();
        write_header(
            &mut output,
            SCRAPES_METRIC,
            "Total number of inventory collections attempted",
            PrometheusType::Counter,
        );
        write_sample(&mut output, SCRAPES_METRIC, &[], stats.scrapes_total);

        write_header(
            &mut output,
            SCRAPE_FAILURES_METRIC,
            "Total number of inventory collections that failed",
            PrometheusType::Counter,
        );
        write_sample(&mut output, SCRAPE_FAILURES_METRIC, &[], stats.scrape_failures_total);

        if let Some(duration) = stats.last_scrape_duration {
            write_header(
                &mut output,
                LAST_DURATION_METRIC,
                "Duration of the last inventory collection in seconds",
                PrometheusType::Gauge,
            );
            write_sample(
                &mut output,
                LAST_DURATION_METRIC,
                &[],
                format_value(duration.as_secs_f64()),
            );
        }

        if let Some(at) = stats.last_success {
            let timestamp = at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            write_header(
                &mut output,
                LAST_SUCCESS_METRIC,
                "Unix time of the last successful inventory collection",
                PrometheusType::Gauge,
            );
            write_sample(&mut output, LAST_SUCCESS_METRIC, &[], format_value(timestamp));
        }

        output
    }
}
