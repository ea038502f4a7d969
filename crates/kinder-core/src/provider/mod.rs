//! Runtime provider abstraction.
//!
//! A [`Provider`] maps cluster operations onto one container runtime. Cluster
//! membership is never stored: it is recomputed from the labels on the
//! runtime's sandboxes every time it is needed.

mod docker;

pub use docker::DockerProvider;

use crate::config::ClusterSpec;
use crate::error::Result;
use crate::node::Node;
use async_trait::async_trait;
use kinder_runtime::bracket_host;
use std::fmt;
use std::path::Path;

/// Label carrying the cluster name on every node.
pub const CLUSTER_LABEL_KEY: &str = "io.x-k8s.kind.cluster";

/// Label carrying the node role on every node.
pub const NODE_ROLE_LABEL_KEY: &str = "io.x-k8s.kind.role";

/// A resolved API server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port` or `[v6]:port`.
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.trim().rsplit_once(':')?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port.parse().ok()?))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", bracket_host(&self.host), self.port)
    }
}

/// Operations every container runtime backend supports.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Backend name.
    fn name(&self) -> &str;

    /// Create every node of `spec`. Nodes created before a failure are left
    /// in place.
    async fn provision(&self, spec: &ClusterSpec) -> Result<()>;

    /// Names of every cluster with at least one node, sorted and de-duplicated.
    async fn list_clusters(&self) -> Result<Vec<String>>;

    /// Nodes of `cluster`, sorted by name.
    async fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>>;

    /// Force-remove nodes and their volumes. An empty slice is a no-op.
    async fn delete_nodes(&self, nodes: &[Node]) -> Result<()>;

    /// API server address reachable from the host.
    async fn external_endpoint(&self, cluster: &str) -> Result<Endpoint>;

    /// API server address reachable from inside the cluster network.
    async fn internal_endpoint(&self, cluster: &str) -> Result<Endpoint>;

    /// Best-effort dump of runtime and node logs into `dir`.
    async fn collect_logs(&self, cluster: &str, dir: &Path) -> Result<()>;
}
