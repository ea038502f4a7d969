//! Live node handles and node selection.

use crate::config::NodeRole;
use crate::error::{CoreError, Result};
use kinder_runtime::{Engine, Output, RuntimeError};
use std::collections::HashMap;
use std::path::Path;

/// Port the API server listens on inside a node.
pub const API_SERVER_INTERNAL_PORT: u16 = 6443;

/// Credential bundle written by kubeadm inside a control-plane node.
pub const ADMIN_KUBECONFIG_PATH: &str = "/etc/kubernetes/admin.conf";

/// Kubeadm configuration path inside every node.
pub const KUBEADM_CONFIG_PATH: &str = "/kind/kubeadm.conf";

/// File holding the node image's Kubernetes version.
pub const VERSION_FILE_PATH: &str = "/kind/version";

/// Handle to a provisioned node sandbox.
///
/// Holds nothing but the sandbox name, its role and the engine used to reach
/// it; every query goes to the runtime.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    role: NodeRole,
    engine: Engine,
}

impl Node {
    /// Create a handle for an existing sandbox.
    pub fn new(name: impl Into<String>, role: NodeRole, engine: Engine) -> Self {
        Self {
            name: name.into(),
            role,
            engine,
        }
    }

    /// Sandbox name, also the node's hostname.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role of this node.
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Run a command inside the node.
    pub async fn exec(&self, argv: &[&str]) -> Result<Output> {
        Ok(self.engine.exec(&self.name, argv, None).await?)
    }

    /// Run a command inside the node, feeding it `stdin`.
    pub async fn exec_with_stdin(&self, argv: &[&str], stdin: Vec<u8>) -> Result<Output> {
        Ok(self.engine.exec(&self.name, argv, Some(stdin)).await?)
    }

    /// Read a file from the node.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self.exec(&["cat", path]).await?.stdout)
    }

    /// Write a file into the node, creating parent directories.
    pub async fn write_file(&self, path: &str, contents: impl Into<Vec<u8>>) -> Result<()> {
        if let Some(parent) = Path::new(path).parent().and_then(Path::to_str) {
            if !parent.is_empty() && parent != "/" {
                self.exec(&["mkdir", "-p", parent]).await?;
            }
        }
        self.exec_with_stdin(&["cp", "/dev/stdin", path], contents.into())
            .await?;
        Ok(())
    }

    /// Host address and port a container port is published on.
    pub async fn port_binding(&self, container_port: u16) -> Result<(String, u16)> {
        let format = format!(
            "{{{{ with (index (index .NetworkSettings.Ports \"{container_port}/tcp\") 0) }}}}\
             {{{{ printf \"%s\\t%s\" .HostIp .HostPort }}}}{{{{ end }}}}"
        );
        let line = self.engine.inspect_line(&self.name, &format).await?;
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 2 {
            return Err(RuntimeError::unexpected(
                format!("inspect {}", self.name),
                format!("port details should have 2 parts, got {}", parts.len()),
            )
            .into());
        }
        let port = parts[1].trim().parse().map_err(|_| {
            RuntimeError::unexpected(
                format!("inspect {}", self.name),
                format!("invalid host port {:?}", parts[1]),
            )
        })?;
        Ok((parts[0].to_string(), port))
    }

    /// Host port a container port is published on.
    pub async fn host_port(&self, container_port: u16) -> Result<u16> {
        Ok(self.port_binding(container_port).await?.1)
    }

    /// IPv4 and IPv6 addresses of the node on `network`. Either may be empty.
    ///
    /// Falls back to the first attached network when the node is not on
    /// `network`.
    pub async fn ip_addresses(&self, network: &str) -> Result<(String, String)> {
        let lines = self
            .engine
            .inspect_format(
                &self.name,
                "{{range $name, $net := .NetworkSettings.Networks}}\
                 {{$name}},{{$net.IPAddress}},{{$net.GlobalIPv6Address}}{{println}}{{end}}",
            )
            .await?;
        let mut attached = Vec::with_capacity(lines.len());
        for line in lines.iter().filter(|l| !l.is_empty()) {
            match line.split(',').collect::<Vec<_>>().as_slice() {
                [name, v4, v6] => attached.push((*name, v4.to_string(), v6.to_string())),
                parts => {
                    return Err(RuntimeError::unexpected(
                        format!("inspect {}", self.name),
                        format!("ip addresses should have 3 parts, got {}", parts.len()),
                    )
                    .into())
                }
            }
        }
        if attached.is_empty() {
            return Err(RuntimeError::unexpected(
                format!("inspect {}", self.name),
                "node is not attached to any network",
            )
            .into());
        }
        let index = attached
            .iter()
            .position(|(name, _, _)| *name == network)
            .unwrap_or(0);
        let (_, v4, v6) = attached.swap_remove(index);
        Ok((v4, v6))
    }

    /// Kubernetes version baked into the node image.
    pub async fn kubernetes_version(&self) -> Result<String> {
        let raw = self.read_file(VERSION_FILE_PATH).await?;
        let version = String::from_utf8_lossy(&raw).trim().to_string();
        if version.is_empty() {
            return Err(CoreError::Validation(format!(
                "{} on {} is empty",
                VERSION_FILE_PATH, self.name
            )));
        }
        Ok(version)
    }

    /// Console output of the node's entrypoint.
    pub async fn serial_logs(&self) -> Result<Vec<u8>> {
        let out = self.engine.logs(&self.name).await?;
        let mut logs = out.stdout;
        logs.extend(out.stderr);
        Ok(logs)
    }
}

/// Names nodes `<cluster>-<role>`, `<cluster>-<role>2`, ... per role.
#[derive(Debug)]
pub struct NodeNamer {
    cluster: String,
    counters: HashMap<NodeRole, usize>,
}

impl NodeNamer {
    /// Namer for the given cluster.
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            counters: HashMap::new(),
        }
    }

    /// Next name for `role`.
    pub fn next(&mut self, role: NodeRole) -> String {
        let count = self.counters.entry(role).or_insert(0);
        *count += 1;
        if *count == 1 {
            format!("{}-{}", self.cluster, role)
        } else {
            format!("{}-{}{}", self.cluster, role, count)
        }
    }
}

fn with_role(nodes: &[Node], role: NodeRole) -> Vec<&Node> {
    let mut selected: Vec<&Node> = nodes.iter().filter(|n| n.role == role).collect();
    selected.sort_by(|a, b| a.name.cmp(&b.name));
    selected
}

/// Control-plane nodes sorted by name.
pub fn control_planes(nodes: &[Node]) -> Vec<&Node> {
    with_role(nodes, NodeRole::ControlPlane)
}

/// Worker nodes sorted by name.
pub fn workers(nodes: &[Node]) -> Vec<&Node> {
    with_role(nodes, NodeRole::Worker)
}

/// The control plane that runs `kubeadm init`: first by name.
pub fn bootstrap_control_plane(nodes: &[Node]) -> Result<&Node> {
    control_planes(nodes)
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::NodeNotFound("no control-plane node found".into()))
}

/// Control planes other than the bootstrap one, sorted by name.
pub fn secondary_control_planes(nodes: &[Node]) -> Vec<&Node> {
    control_planes(nodes).into_iter().skip(1).collect()
}

/// The load balancer node, if the cluster has one.
pub fn external_load_balancer(nodes: &[Node]) -> Result<Option<&Node>> {
    let lbs = with_role(nodes, NodeRole::ExternalLoadBalancer);
    if lbs.len() > 1 {
        return Err(CoreError::Validation(format!(
            "expected at most one load balancer node, found {}",
            lbs.len()
        )));
    }
    Ok(lbs.into_iter().next())
}

/// Node serving the API endpoint: the load balancer if present, else the
/// bootstrap control plane.
pub fn api_server_endpoint_node(nodes: &[Node]) -> Result<&Node> {
    match external_load_balancer(nodes)? {
        Some(lb) => Ok(lb),
        None => bootstrap_control_plane(nodes),
    }
}
