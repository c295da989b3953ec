//! Snapshot collector that queries the inventory for every resource kind.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;
use thiserror::Error;
use tracing::{debug, warn};

use rancher_exporter_common::{NodeSample, ResourceKind, Snapshot};

use crate::client::{InventoryRecord, SharedClient, UpstreamError};
use crate::config::{CollectionConfig, FailureMode};

/// A listing that failed during a best-effort collection.
#[derive(Debug)]
pub struct KindFailure {
    pub kind: ResourceKind,
    pub error: UpstreamError,
}

impl fmt::Display for KindFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

/// Errors that abort a whole collection.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Failed to list {kind} resources: {source}")]
    Upstream {
        kind: ResourceKind,
        #[source]
        source: UpstreamError,
    },
    #[error("All resource listings failed: {}", join_failures(.0))]
    AllFailed(Vec<KindFailure>),
    #[error("Collection timed out after {0:?}")]
    Timeout(Duration),
}

impl CollectError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CollectError::Timeout(_))
    }
}

fn join_failures(failures: &[KindFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result of a successful collection.
#[derive(Debug)]
pub enum Collection {
    /// Every kind was listed.
    Complete(Snapshot),
    /// Some kinds failed (best-effort mode only).
    Partial {
        snapshot: Snapshot,
        failures: Vec<KindFailure>,
    },
}

impl Collection {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            Collection::Complete(snapshot) => snapshot,
            Collection::Partial { snapshot, .. } => snapshot,
        }
    }

    pub fn failures(&self) -> &[KindFailure] {
        match self {
            Collection::Complete(_) => &[],
            Collection::Partial { failures, .. } => failures,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Collection::Complete(_))
    }
}

/// Builds snapshots from the remote inventory.
///
/// Listings run concurrently up to `max_concurrent_requests`. The collector
/// never touches the metric registry; see [`crate::registry::MetricRegistry::project`].
pub struct SnapshotCollector {
    client: SharedClient,
    failure_mode: FailureMode,
    max_concurrent_requests: usize,
    timeout: Duration,
}

impl SnapshotCollector {
    /// Create a new collector.
    pub fn new(client: SharedClient, config: &CollectionConfig) -> Self {
        Self {
            client,
            failure_mode: config.failure_mode,
            max_concurrent_requests: config.max_concurrent_requests.max(1),
            timeout: config.scrape_timeout(),
        }
    }

    /// Override the collection timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Collect one snapshot.
    ///
    /// Dropping the returned future, or hitting the timeout, cancels the
    /// outstanding listings.
    pub async fn collect(&self) -> Result<Collection, CollectError> {
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.collect_listings()).await {
            Ok(result) => result,
            Err(_) => Err(CollectError::Timeout(self.timeout)),
        };

        match &result {
            Ok(collection) => debug!(
                complete = collection.is_complete(),
                failed_kinds = collection.failures().len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Collected inventory snapshot"
            ),
            Err(e) => debug!(
                error = %e,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Inventory collection failed"
            ),
        }

        result
    }

    async fn collect_listings(&self) -> Result<Collection, CollectError> {
        let client = &self.client;
        let mut listings = stream::iter(ResourceKind::ALL)
            .map(|kind| async move { (kind, client.list_all(kind).await) })
            .buffer_unordered(self.max_concurrent_requests);

        let mut listed: BTreeMap<ResourceKind, Vec<InventoryRecord>> = BTreeMap::new();
        let mut failures = Vec::new();

        while let Some((kind, result)) = listings.next().await {
            match result {
                Ok(records) => {
                    listed.insert(kind, records);
                }
                Err(error) => match self.failure_mode {
                    // Returning drops the stream and the listings still in flight.
                    FailureMode::FailFast => {
                        return Err(CollectError::Upstream {
                            kind,
                            source: error,
                        });
                    }
                    FailureMode::BestEffort => {
                        warn!(kind = %kind, error = %error, "Resource listing failed, keeping other kinds");
                        failures.push(KindFailure { kind, error });
                    }
                },
            }
        }

        if listed.is_empty() {
            return Err(CollectError::AllFailed(failures));
        }

        let snapshot = build_snapshot(listed);
        if failures.is_empty() {
            Ok(Collection::Complete(snapshot))
        } else {
            failures.sort_by_key(|f| f.kind);
            Ok(Collection::Partial { snapshot, failures })
        }
    }
}

/// Turn per-kind listings into a snapshot.
fn build_snapshot(listed: BTreeMap<ResourceKind, Vec<InventoryRecord>>) -> Snapshot {
    let mut snapshot = Snapshot::new();

    for (kind, records) in listed {
        let count = records.len() as u64;
        snapshot = match kind {
            ResourceKind::Node => snapshot.with_nodes(count, node_samples(&records)),
            _ => snapshot.with_count(kind, count),
        };
    }

    snapshot
}

fn node_samples(records: &[InventoryRecord]) -> Vec<NodeSample> {
    records
        .iter()
        .filter_map(|record| match &record.node {
            Some(node) => Some(node.to_sample()),
            None => {
                warn!(id = %record.id, "Node record without node details, skipping sample");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InventoryClient, NodeRecord};
    use async_trait::async_trait;
    use rancher_exporter_common::NodeRole;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockClient {
        records: HashMap<ResourceKind, Vec<InventoryRecord>>,
        failing: HashSet<ResourceKind>,
        delays: HashMap<ResourceKind, Duration>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockClient {
        fn with_counts(mut self, kind: ResourceKind, count: usize) -> Self {
            let records = (0..count)
                .map(|i| InventoryRecord::new(format!("{}-{}", kind, i)))
                .collect();
            self.records.insert(kind, records);
            self
        }

        fn with_nodes(mut self, nodes: Vec<NodeRecord>) -> Self {
            let records = nodes
                .into_iter()
                .enumerate()
                .map(|(i, n)| InventoryRecord::node(format!("m-{}", i), n))
                .collect();
            self.records.insert(ResourceKind::Node, records);
            self
        }

        fn failing(mut self, kind: ResourceKind) -> Self {
            self.failing.insert(kind);
            self
        }

        fn delayed(mut self, kind: ResourceKind, delay: Duration) -> Self {
            self.delays.insert(kind, delay);
            self
        }
    }

    #[async_trait]
    impl InventoryClient for MockClient {
        async fn list_all(&self, kind: ResourceKind) -> Result<Vec<InventoryRecord>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = self
                .delays
                .get(&kind)
                .copied()
                .unwrap_or(Duration::from_millis(5));
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&kind) {
                return Err(UpstreamError::Protocol(format!("{} unavailable", kind)));
            }
            Ok(self.records.get(&kind).cloned().unwrap_or_default())
        }
    }

    fn node(cluster: &str, name: &str, worker: bool, cpu: i64, mem: i64) -> NodeRecord {
        NodeRecord {
            cluster_id: cluster.to_string(),
            node_name: name.to_string(),
            worker,
            cpu_count: cpu,
            memory_total_kib: mem,
        }
    }

    fn full_mock() -> MockClient {
        MockClient::default()
            .with_counts(ResourceKind::Cluster, 5)
            .with_counts(ResourceKind::Project, 3)
            .with_counts(ResourceKind::Token, 7)
            .with_counts(ResourceKind::User, 2)
            .with_nodes(vec![
                node("c1", "n1", true, 4, 8_000_000),
                node("c1", "n2", false, 2, 4_000_000),
            ])
    }

    fn make_collector(client: MockClient, config: CollectionConfig) -> (Arc<MockClient>, SnapshotCollector) {
        let client = Arc::new(client);
        let collector = SnapshotCollector::new(client.clone(), &config);
        (client, collector)
    }

    #[tokio::test]
    async fn test_collect_complete() {
        let (mock, collector) = make_collector(full_mock(), CollectionConfig::default());

        let collection = collector.collect().await.unwrap();
        assert!(collection.is_complete());

        let snapshot = collection.snapshot();
        assert_eq!(snapshot.cluster_count(), Some(5));
        assert_eq!(snapshot.project_count(), Some(3));
        assert_eq!(snapshot.node_count(), Some(2));
        assert_eq!(snapshot.token_count(), Some(7));
        assert_eq!(snapshot.user_count(), Some(2));

        let samples = snapshot.node_samples().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], NodeSample::new("c1", "n1", NodeRole::Worker, 4, 8_000_000));
        assert_eq!(samples[1].role, NodeRole::Master);

        // Nodes are listed once for both the count and the samples.
        assert_eq!(mock.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_collect_fail_fast() {
        let (_, collector) = make_collector(
            full_mock().failing(ResourceKind::Project),
            CollectionConfig::default(),
        );

        let err = collector.collect().await.unwrap_err();
        match err {
            CollectError::Upstream { kind, .. } => assert_eq!(kind, ResourceKind::Project),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_collect_fail_fast_cancels_slow_listings() {
        let (_, collector) = make_collector(
            full_mock()
                .failing(ResourceKind::Project)
                .delayed(ResourceKind::Project, Duration::from_millis(1))
                .delayed(ResourceKind::User, Duration::from_secs(5)),
            CollectionConfig::default(),
        );

        let start = Instant::now();
        let err = collector.collect().await.unwrap_err();
        assert!(matches!(err, CollectError::Upstream { .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_collect_best_effort_partial() {
        let config = CollectionConfig {
            failure_mode: FailureMode::BestEffort,
            ..Default::default()
        };
        let (_, collector) = make_collector(
            full_mock()
                .failing(ResourceKind::Project)
                .failing(ResourceKind::Node),
            config,
        );

        let collection = collector.collect().await.unwrap();
        assert!(!collection.is_complete());

        let failed: Vec<_> = collection.failures().iter().map(|f| f.kind).collect();
        assert_eq!(failed, vec![ResourceKind::Project, ResourceKind::Node]);

        let snapshot = collection.snapshot();
        assert_eq!(snapshot.cluster_count(), Some(5));
        assert_eq!(snapshot.project_count(), None);
        assert_eq!(snapshot.node_count(), None);
        assert!(snapshot.node_samples().is_none());
    }

    #[tokio::test]
    async fn test_collect_best_effort_all_failed() {
        let config = CollectionConfig {
            failure_mode: FailureMode::BestEffort,
            ..Default::default()
        };
        let mut mock = MockClient::default();
        for kind in ResourceKind::ALL {
            mock = mock.failing(kind);
        }
        let (_, collector) = make_collector(mock, config);

        let err = collector.collect().await.unwrap_err();
        match err {
            CollectError::AllFailed(failures) => assert_eq!(failures.len(), 5),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_collect_timeout_is_distinct() {
        let (_, collector) = make_collector(
            full_mock().delayed(ResourceKind::Token, Duration::from_secs(5)),
            CollectionConfig::default(),
        );
        let collector = collector.with_timeout(Duration::from_millis(100));

        let err = collector.collect().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_collect_respects_concurrency_bound() {
        let config = CollectionConfig {
            max_concurrent_requests: 2,
            ..Default::default()
        };
        let mut mock = full_mock();
        for kind in ResourceKind::ALL {
            mock = mock.delayed(kind, Duration::from_millis(20));
        }
        let (mock, collector) = make_collector(mock, config);

        collector.collect().await.unwrap();
        assert!(mock.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_collect_sequential() {
        let config = CollectionConfig {
            max_concurrent_requests: 1,
            ..Default::default()
        };
        let (mock, collector) = make_collector(full_mock(), config);

        let collection = collector.collect().await.unwrap();
        assert!(collection.is_complete());
        assert_eq!(mock.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_node_records_without_details_are_counted_not_sampled() {
        let mut listed = BTreeMap::new();
        listed.insert(
            ResourceKind::Node,
            vec![
                InventoryRecord::node("m-1", node("c1", "n1", true, 4, 1024)),
                InventoryRecord::new("m-2"),
            ],
        );

        let snapshot = build_snapshot(listed);
        assert_eq!(snapshot.node_count(), Some(2));
        assert_eq!(snapshot.node_samples().unwrap().len(), 1);
    }

    #[test]
    fn test_all_failed_message_lists_kinds() {
        let err = CollectError::AllFailed(vec![KindFailure {
            kind: ResourceKind::User,
            error: UpstreamError::Protocol("boom".to_string()),
        }]);
        assert!(err.to_string().contains("user: Unexpected response: boom"));
    }
}
