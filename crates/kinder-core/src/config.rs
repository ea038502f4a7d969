//! Cluster topology configuration types.

use crate::error::CoreError;
use kinder_runtime::{Mount, PortMapping};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Node image used when a node does not name one.
pub const DEFAULT_NODE_IMAGE: &str = "kindest/node:v1.29.2";

/// Runtime network shared by every cluster unless overridden.
pub const DEFAULT_NETWORK: &str = "kind";

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Runs the API server and etcd.
    ControlPlane,
    /// Runs workloads only.
    Worker,
    /// Fronts multiple control planes. Planned implicitly, never declared.
    ExternalLoadBalancer,
}

impl NodeRole {
    /// Label value for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControlPlane => "control-plane",
            Self::Worker => "worker",
            Self::ExternalLoadBalancer => "external-load-balancer",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control-plane" => Ok(Self::ControlPlane),
            "worker" => Ok(Self::Worker),
            "external-load-balancer" => Ok(Self::ExternalLoadBalancer),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

/// IP family of the cluster network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    #[default]
    Ipv4,
    Ipv6,
}

impl FromStr for IpFamily {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            other => Err(CoreError::Validation(format!("unknown IP family {other:?}"))),
        }
    }
}

/// One declared node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Role of the node.
    pub role: NodeRole,
    /// Node image; empty means the cluster default.
    #[serde(default)]
    pub image: String,
    /// Extra host paths mounted into the node.
    #[serde(default)]
    pub extra_mounts: Vec<Mount>,
    /// Extra ports published on the host.
    #[serde(default)]
    pub extra_port_mappings: Vec<PortMapping>,
    /// Networks to join. The first is used at creation time.
    #[serde(default)]
    pub networks: Vec<String>,
}

impl NodeSpec {
    /// Node with the given role and no extras.
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            image: String::new(),
            extra_mounts: Vec::new(),
            extra_port_mappings: Vec::new(),
            networks: Vec::new(),
        }
    }

    /// Use a specific image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Add a bind mount.
    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.extra_mounts.push(mount);
        self
    }

    /// Add a published port.
    pub fn with_port(mut self, port: PortMapping) -> Self {
        self.extra_port_mappings.push(port);
        self
    }

    /// Join an additional network.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.networks.push(network.into());
        self
    }
}

/// API server and subnet settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    /// IP family.
    pub ip_family: IpFamily,
    /// Host address the API server is published on.
    pub api_server_address: String,
    /// Host port the API server is published on (0 = auto).
    pub api_server_port: u16,
    /// Pod CIDR.
    pub pod_subnet: String,
    /// Service CIDR.
    pub service_subnet: String,
}

impl Networking {
    /// Defaults for the given IP family.
    pub fn for_family(ip_family: IpFamily) -> Self {
        match ip_family {
            IpFamily::Ipv4 => Self {
                ip_family,
                api_server_address: "127.0.0.1".into(),
                api_server_port: 0,
                pod_subnet: "10.244.0.0/16".into(),
                service_subnet: "10.96.0.0/16".into(),
            },
            IpFamily::Ipv6 => Self {
                ip_family,
                api_server_address: "::1".into(),
                api_server_port: 0,
                pod_subnet: "fd00:10:244::/56".into(),
                service_subnet: "fd00:10:96::/112".into(),
            },
        }
    }
}

impl Default for Networking {
    fn default() -> Self {
        Self::for_family(IpFamily::Ipv4)
    }
}

/// Desired cluster topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster name, stamped on every node as a label.
    pub name: String,
    /// Declared nodes, in order.
    pub nodes: Vec<NodeSpec>,
    /// API server and subnet settings.
    pub networking: Networking,
    /// Runtime network the nodes attach to by default.
    pub network: String,
}

impl ClusterSpec {
    /// Create a new spec builder.
    pub fn builder() -> ClusterSpecBuilder {
        ClusterSpecBuilder::default()
    }

    /// Number of declared control-plane nodes.
    pub fn control_plane_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.role == NodeRole::ControlPlane)
            .count()
    }

    /// Whether an external load balancer must front the control plane.
    pub fn has_implicit_load_balancer(&self) -> bool {
        self.control_plane_count() > 1
    }

    /// Whether the cluster uses IPv6.
    pub fn is_ipv6(&self) -> bool {
        self.networking.ip_family == IpFamily::Ipv6
    }

    /// Distinct node images, sorted.
    pub fn images(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|n| n.image.as_str()).collect()
    }

    /// Validate the spec. Runs before any side effect.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::Validation("name is required".into()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(CoreError::Validation(format!(
                "name {:?} may only contain lowercase letters, digits, '-' and '.'",
                self.name
            )));
        }
        if self.network.is_empty() {
            return Err(CoreError::Validation("network is required".into()));
        }
        for node in &self.nodes {
            if node.role == NodeRole::ExternalLoadBalancer {
                return Err(CoreError::UnknownRole(node.role.to_string()));
            }
            if node.image.is_empty() {
                return Err(CoreError::Validation(format!(
                    "{} node has no image",
                    node.role
                )));
            }
        }
        if self.control_plane_count() == 0 {
            return Err(CoreError::Validation(
                "at least one control-plane node is required".into(),
            ));
        }

        let address: IpAddr = self
            .networking
            .api_server_address
            .parse()
            .map_err(|_| {
                CoreError::Validation(format!(
                    "invalid api server address {:?}",
                    self.networking.api_server_address
                ))
            })?;
        if address.is_ipv6() != self.is_ipv6() {
            return Err(CoreError::Validation(format!(
                "api server address {} does not match IP family {:?}",
                address, self.networking.ip_family
            )));
        }
        Ok(())
    }
}

/// Builder for ClusterSpec.
#[derive(Debug, Default)]
pub struct ClusterSpecBuilder {
    name: String,
    image: Option<String>,
    nodes: Vec<NodeSpec>,
    ip_family: IpFamily,
    api_server_address: Option<String>,
    api_server_port: u16,
    pod_subnet: Option<String>,
    service_subnet: Option<String>,
    network: Option<String>,
}

impl ClusterSpecBuilder {
    /// Set the cluster name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the image used by nodes that do not name one.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Add a declared node.
    pub fn node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add `count` plain control-plane nodes.
    pub fn control_planes(mut self, count: usize) -> Self {
        self.nodes
            .extend((0..count).map(|_| NodeSpec::new(NodeRole::ControlPlane)));
        self
    }

    /// Add `count` plain worker nodes.
    pub fn workers(mut self, count: usize) -> Self {
        self.nodes
            .extend((0..count).map(|_| NodeSpec::new(NodeRole::Worker)));
        self
    }

    /// Set the IP family.
    pub fn ip_family(mut self, family: IpFamily) -> Self {
        self.ip_family = family;
        self
    }

    /// Set the host address the API server is published on.
    pub fn api_server_address(mut self, address: impl Into<String>) -> Self {
        self.api_server_address = Some(address.into());
        self
    }

    /// Set the host port the API server is published on (0 = auto).
    pub fn api_server_port(mut self, port: u16) -> Self {
        self.api_server_port = port;
        self
    }

    /// Set the pod CIDR.
    pub fn pod_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.pod_subnet = Some(subnet.into());
        self
    }

    /// Set the service CIDR.
    pub fn service_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.service_subnet = Some(subnet.into());
        self
    }

    /// Use a runtime network other than the default.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Build the spec, applying defaults and validating.
    pub fn build(self) -> Result<ClusterSpec, CoreError> {
        let image = self.image.unwrap_or_else(|| DEFAULT_NODE_IMAGE.to_string());
        let nodes = self
            .nodes
            .into_iter()
            .map(|mut n| {
                if n.image.is_empty() {
                    n.image = image.clone();
                }
                n
            })
            .collect();

        let mut networking = Networking::for_family(self.ip_family);
        networking.api_server_port = self.api_server_port;
        if let Some(address) = self.api_server_address {
            networking.api_server_address = address;
        }
        if let Some(subnet) = self.pod_subnet {
            networking.pod_subnet = subnet;
        }
        if let Some(subnet) = self.service_subnet {
            networking.service_subnet = subnet;
        }

        let spec = ClusterSpec {
            name: self.name,
            nodes,
            networking,
            network: self.network.unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
        };
        spec.validate()?;
        Ok(spec)
    }
}
