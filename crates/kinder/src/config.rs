//! Configuration for the kinder binary.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use kinder_core::{ClusterSpec, CoreError, IpFamily, DEFAULT_NETWORK, DEFAULT_NODE_IMAGE};
use std::path::PathBuf;

/// Cluster name used when `KINDER_NAME` is unset.
pub const DEFAULT_CLUSTER_NAME: &str = "kind";

/// Configuration for one kinder invocation.
#[derive(Debug, Clone)]
pub struct KinderConfig {
    /// Cluster name.
    pub name: String,

    /// Node image for every node.
    pub image: String,

    /// Number of control-plane nodes (default: 1).
    pub control_planes: usize,

    /// Number of worker nodes (default: 0).
    pub workers: usize,

    /// Host address the API server is published on. Family default when unset.
    pub api_address: Option<String>,

    /// Host port the API server is published on (default: 0, pick a free port).
    pub api_port: u16,

    /// `ipv4` or `ipv6`.
    pub ip_family: String,

    /// Kubeconfig destination. `~/.kube/kinder-<name>.config` when unset.
    pub kubeconfig: Option<PathBuf>,

    /// Keep nodes after a failed create (default: false).
    pub retain: bool,

    /// Container network the nodes join.
    pub network: String,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cluster name must not be empty")]
    EmptyName,

    #[error("at least one control-plane node is required")]
    NoControlPlanes,

    #[error("unsupported IP family: {0:?} (expected ipv4 or ipv6)")]
    InvalidIpFamily(String),

    #[error("network name must not be empty")]
    EmptyNetwork,
}

impl Default for KinderConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CLUSTER_NAME.to_string(),
            image: DEFAULT_NODE_IMAGE.to_string(),
            control_planes: 1,
            workers: 0,
            api_address: None,
            api_port: 0,
            ip_family: "ipv4".to_string(),
            kubeconfig: None,
            retain: false,
            network: DEFAULT_NETWORK.to_string(),
        }
    }
}

impl KinderConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `KINDER_NAME` | `kind` |
    /// | `KINDER_IMAGE` | `kindest/node:v1.29.2` |
    /// | `KINDER_CONTROL_PLANES` | `1` |
    /// | `KINDER_WORKERS` | `0` |
    /// | `KINDER_API_ADDRESS` | `127.0.0.1` (`::1` for ipv6) |
    /// | `KINDER_API_PORT` | `0` (random free port) |
    /// | `KINDER_IP_FAMILY` | `ipv4` |
    /// | `KINDER_KUBECONFIG` | `~/.kube/kinder-<name>.config` |
    /// | `KINDER_RETAIN` | `false` |
    /// | `KINDER_NETWORK` | `kind` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        Self {
            name: lookup("KINDER_NAME").unwrap_or(default.name),
            image: lookup("KINDER_IMAGE").unwrap_or(default.image),
            control_planes: lookup("KINDER_CONTROL_PLANES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.control_planes),
            workers: lookup("KINDER_WORKERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.workers),
            api_address: lookup("KINDER_API_ADDRESS").filter(|v| !v.is_empty()),
            api_port: lookup("KINDER_API_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.api_port),
            ip_family: lookup("KINDER_IP_FAMILY").unwrap_or(default.ip_family),
            kubeconfig: lookup("KINDER_KUBECONFIG")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            retain: lookup("KINDER_RETAIN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(default.retain),
            network: lookup("KINDER_NETWORK").unwrap_or(default.network),
        }
    }

    /// Check values the cluster spec builder cannot report clearly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.control_planes == 0 {
            return Err(ConfigError::NoControlPlanes);
        }
        if self.ip_family.parse::<IpFamily>().is_err() {
            return Err(ConfigError::InvalidIpFamily(self.ip_family.clone()));
        }
        if self.network.is_empty() {
            return Err(ConfigError::EmptyNetwork);
        }
        Ok(())
    }

    /// Where the kubeconfig is written.
    pub fn kubeconfig_path(&self) -> PathBuf {
        if let Some(path) = &self.kubeconfig {
            return path.clone();
        }
        let file = format!("kinder-{}.config", self.name);
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".kube").join(file),
            None => PathBuf::from(file),
        }
    }

    /// Cluster spec described by this configuration.
    pub fn to_spec(&self) -> Result<ClusterSpec, CoreError> {
        let mut builder = ClusterSpec::builder()
            .name(&self.name)
            .image(&self.image)
            .control_planes(self.control_planes)
            .workers(self.workers)
            .ip_family(self.ip_family.parse()?)
            .api_server_port(self.api_port)
            .network(&self.network);
        if let Some(address) = &self.api_address {
            builder = builder.api_server_address(address);
        }
        builder.build()
    }
}
