//! Inventory data model shared by the collector and the metric registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of resource listed from the Rancher management API.
///
/// The declaration order is the collection and rendering order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cluster,
    Project,
    Node,
    Token,
    User,
}

impl ResourceKind {
    /// Every kind, in collection order.
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Cluster,
        ResourceKind::Project,
        ResourceKind::Node,
        ResourceKind::Token,
        ResourceKind::User,
    ];

    /// Get the lowercase name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::Project => "project",
            ResourceKind::Node => "node",
            ResourceKind::Token => "token",
            ResourceKind::User => "user",
        }
    }

    /// Collection name in the v3 management API (`/v3/<collection>`).
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "clusters",
            ResourceKind::Project => "projects",
            ResourceKind::Node => "nodes",
            ResourceKind::Token => "tokens",
            ResourceKind::User => "users",
        }
    }

    /// Name of the published count metric for this kind.
    pub fn count_metric(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "rancher_cluster_count",
            ResourceKind::Project => "rancher_project_count",
            ResourceKind::Node => "rancher_node_count",
            ResourceKind::Token => "rancher_token_count",
            ResourceKind::User => "rancher_user_count",
        }
    }

    /// HELP text of the published count metric.
    pub fn count_help(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "Current count of cluster resource in Rancher",
            ResourceKind::Project => "Current count of project resource in Rancher",
            ResourceKind::Node => "Current count of node resource in Rancher",
            ResourceKind::Token => "Current count of token resource in Rancher",
            ResourceKind::User => "Current count of user resource in Rancher",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a node inside its cluster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Worker,
    Master,
}

impl NodeRole {
    /// Derive the role from the node's worker flag.
    pub fn from_worker_flag(worker: bool) -> Self {
        if worker {
            NodeRole::Worker
        } else {
            NodeRole::Master
        }
    }

    /// Value of the `type` label.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Worker => "worker",
            NodeRole::Master => "master",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU and memory capacity of one node, as seen in one collection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSample {
    /// Identifier of the cluster owning the node (e.g., "c-m-4x2ab").
    pub cluster_id: String,
    /// Node name.
    pub node_name: String,
    /// Worker or master.
    pub role: NodeRole,
    /// Number of CPU cores.
    pub cpu_count: i64,
    /// Total memory in KiB.
    pub memory_total_kib: i64,
}

impl NodeSample {
    /// Create a new node sample.
    pub fn new(
        cluster_id: impl Into<String>,
        node_name: impl Into<String>,
        role: NodeRole,
        cpu_count: i64,
        memory_total_kib: i64,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            node_name: node_name.into(),
            role,
            cpu_count,
            memory_total_kib,
        }
    }
}

/// One point-in-time aggregation of inventory counts and node samples.
///
/// A snapshot produced by a best-effort collection may lack some kinds, so the
/// per-kind accessors return `Option`. Node samples are present exactly when
/// the node count is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    counts: BTreeMap<ResourceKind, u64>,
    node_samples: Option<Vec<NodeSample>>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the count of a non-node kind.
    ///
    /// Node counts go through [`Snapshot::with_nodes`] so that the count and
    /// the samples always come from the same listing.
    pub fn with_count(mut self, kind: ResourceKind, count: u64) -> Self {
        debug_assert!(kind != ResourceKind::Node, "use with_nodes for nodes");
        if kind != ResourceKind::Node {
            self.counts.insert(kind, count);
        }
        self
    }

    /// Set the node count and the samples derived from the same listing.
    pub fn with_nodes(mut self, node_count: u64, samples: Vec<NodeSample>) -> Self {
        self.counts.insert(ResourceKind::Node, node_count);
        self.node_samples = Some(samples);
        self
    }

    /// Count collected for a kind, if that kind was collected.
    pub fn count(&self, kind: ResourceKind) -> Option<u64> {
        self.counts.get(&kind).copied()
    }

    pub fn cluster_count(&self) -> Option<u64> {
        self.count(ResourceKind::Cluster)
    }

    pub fn project_count(&self) -> Option<u64> {
        self.count(ResourceKind::Project)
    }

    pub fn node_count(&self) -> Option<u64> {
        self.count(ResourceKind::Node)
    }

    pub fn token_count(&self) -> Option<u64> {
        self.count(ResourceKind::Token)
    }

    pub fn user_count(&self) -> Option<u64> {
        self.count(ResourceKind::User)
    }

    /// Node samples, if nodes were collected.
    pub fn node_samples(&self) -> Option<&[NodeSample]> {
        self.node_samples.as_deref()
    }

    /// Kinds present in this snapshot, in collection order.
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.counts.keys().copied()
    }

    /// Whether every kind was collected.
    pub fn is_complete(&self) -> bool {
        ResourceKind::ALL.iter().all(|k| self.counts.contains_key(k))
    }
}
