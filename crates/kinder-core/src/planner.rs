//! Topology planning: from a [`ClusterSpec`] to concrete node creation operations.
//!
//! Planning is pure apart from host port allocation. Every decision that one
//! creation depends on (the load balancer's port, each control plane's API
//! port) is settled here, before any operation is submitted, so the creations
//! themselves can run in any order.

use crate::config::{ClusterSpec, NodeRole};
use crate::error::{CoreError, Result};
use crate::loadbalancer::{CONTROL_PLANE_PORT, LOAD_BALANCER_IMAGE};
use crate::node::{NodeNamer, API_SERVER_INTERNAL_PORT};
use crate::provider::{CLUSTER_LABEL_KEY, NODE_ROLE_LABEL_KEY};
use kinder_runtime::{PortMapping, RunArgs};
use std::collections::BTreeMap;
use std::net::TcpListener;

/// Proxy variables forwarded into every node.
pub const PROXY_VARS: [&str; 3] = ["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY"];

/// One node creation, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOp {
    /// Node name.
    pub name: String,
    /// Node role.
    pub role: NodeRole,
    /// Full `run ...` argument vector.
    pub args: Vec<String>,
    /// Networks joined after creation, in order.
    pub extra_networks: Vec<String>,
}

/// Hands out host ports for port-0 requests.
///
/// Allocated ports stay bound until the allocator is dropped so that two
/// requests in the same plan never receive the same port.
#[derive(Debug, Default)]
pub struct PortAllocator {
    held: Vec<TcpListener>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `port` as-is when non-zero, otherwise a free port on `address`.
    ///
    /// A non-zero port is not checked for conflicts.
    pub fn port_or_free(&mut self, port: u16, address: &str) -> Result<u16> {
        if port != 0 {
            return Ok(port);
        }
        let address = if address.is_empty() { "0.0.0.0" } else { address };
        let listener = TcpListener::bind((address, 0))?;
        let port = listener.local_addr()?.port();
        self.held.push(listener);
        Ok(port)
    }

    /// Ports currently held.
    pub fn held(&self) -> usize {
        self.held.len()
    }
}

/// Proxy settings found through `lookup`, keyed by the canonical upper-case
/// name. The lower-case variant is consulted when the upper-case one is unset.
pub fn proxy_vars<F>(lookup: F) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = BTreeMap::new();
    for name in PROXY_VARS {
        let value = lookup(name)
            .filter(|v| !v.is_empty())
            .or_else(|| lookup(name.to_lowercase().as_str()).filter(|v| !v.is_empty()));
        if let Some(value) = value {
            env.insert(name.to_string(), value);
        }
    }
    env
}

/// Put the network's subnets ahead of any existing no-proxy list and set
/// both spellings of the variable. No-op when no proxy is configured.
pub fn append_no_proxy(env: &mut BTreeMap<String, String>, subnets: &[String]) {
    if env.is_empty() {
        return;
    }
    let mut list: Vec<String> = subnets.to_vec();
    if let Some(existing) = env.get("NO_PROXY").filter(|v| !v.is_empty()) {
        list.push(existing.clone());
    }
    let joined = list.join(",");
    env.insert("NO_PROXY".into(), joined.clone());
    env.insert("no_proxy".into(), joined);
}

/// Arguments shared by every node of the cluster.
pub fn common_args(
    spec: &ClusterSpec,
    proxy_env: &BTreeMap<String, String>,
    userns_remap: bool,
) -> Vec<String> {
    let mut args = vec![
        "--label".to_string(),
        format!("{}={}", CLUSTER_LABEL_KEY, spec.name),
    ];
    if spec.is_ipv6() {
        args.push("--sysctl=net.ipv6.conf.all.disable_ipv6=0".into());
        args.push("--sysctl=net.ipv6.conf.all.forwarding=1".into());
    }
    for (key, value) in proxy_env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }
    if userns_remap {
        args.push("--userns=host".into());
    }
    args
}

/// Plan every node creation for `spec`.
///
/// The load balancer, when needed, is planned and given its port first.
/// Control planes behind a load balancer are published on an automatic
/// loopback port instead of the configured endpoint.
pub fn plan(
    spec: &ClusterSpec,
    common: &[String],
    ports: &mut PortAllocator,
) -> Result<Vec<CreateOp>> {
    spec.validate()?;

    let mut namer = NodeNamer::new(&spec.name);
    let mut ops = Vec::with_capacity(spec.nodes.len() + 1);

    let mut api_address = spec.networking.api_server_address.clone();
    let mut api_port = spec.networking.api_server_port;

    if spec.has_implicit_load_balancer() {
        let name = namer.next(NodeRole::ExternalLoadBalancer);
        let port = ports
            .port_or_free(api_port, &api_address)
            .map_err(|e| e.context("failed to get port for api server load balancer"))?;
        let publish = PortMapping::tcp(api_address.as_str(), port, CONTROL_PLANE_PORT);
        let args = RunArgs::new()
            .hostname(&name)
            .name(&name)
            .label(NODE_ROLE_LABEL_KEY, NodeRole::ExternalLoadBalancer.as_str())
            .extra(common.iter().cloned())
            .ports([&publish])
            .network(&spec.network)
            .image(LOAD_BALANCER_IMAGE)
            .build();
        tracing::debug!(node = %name, port, "Planned load balancer");
        ops.push(CreateOp {
            name,
            role: NodeRole::ExternalLoadBalancer,
            args,
            extra_networks: Vec::new(),
        });

        api_port = 0;
        api_address = if spec.is_ipv6() { "::1" } else { "127.0.0.1" }.to_string();
    }

    for node in &spec.nodes {
        let name = namer.next(node.role);
        let mut port_mappings = node.extra_port_mappings.clone();
        match node.role {
            NodeRole::ControlPlane => {
                let port = ports
                    .port_or_free(api_port, &api_address)
                    .map_err(|e| e.context("failed to get port for API server"))?;
                port_mappings.push(PortMapping::tcp(
                    api_address.as_str(),
                    port,
                    API_SERVER_INTERNAL_PORT,
                ));
            }
            NodeRole::Worker => {}
            NodeRole::ExternalLoadBalancer => {
                return Err(CoreError::UnknownRole(node.role.to_string()));
            }
        }

        let (first_network, extra_networks) = match node.networks.split_first() {
            Some((first, rest)) => (first.as_str(), rest.to_vec()),
            None => (spec.network.as_str(), Vec::new()),
        };

        let args = RunArgs::new()
            .hostname(&name)
            .name(&name)
            .label(NODE_ROLE_LABEL_KEY, node.role.as_str())
            .privileged()
            .tmpfs("/tmp")
            .tmpfs("/run")
            .volume("/var")
            .volume("/lib/modules:/lib/modules:ro")
            .extra(common.iter().cloned())
            .mounts(&node.extra_mounts)
            .ports(&port_mappings)
            .network(first_network)
            .image(&node.image)
            .build();
        ops.push(CreateOp {
            name,
            role: node.role,
            args,
            extra_networks,
        });
    }

    Ok(ops)
}
