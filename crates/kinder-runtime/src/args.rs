//! Builder for `run` argument vectors plus mount and port translation.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Mount propagation mode for a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MountPropagation {
    /// No propagation; the runtime default (private).
    #[default]
    None,
    /// Mounts propagate host to container only (`rslave`).
    HostToContainer,
    /// Mounts propagate both ways (`rshared`).
    Bidirectional,
}

/// A host path bind-mounted into a node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    /// Path on the host.
    pub host_path: String,
    /// Path inside the node.
    pub container_path: String,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Request SELinux relabeling (`Z`).
    #[serde(default)]
    pub selinux_relabel: bool,
    /// Propagation mode.
    #[serde(default)]
    pub propagation: MountPropagation,
}

impl Mount {
    /// Create a read-write bind mount with default propagation.
    pub fn new(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            ..Default::default()
        }
    }

    /// Translate to a `--volume=` argument.
    ///
    /// Format: `<host>:<container>[:opts]` where opts is a comma separated
    /// subset of `ro`, `Z` and `rshared`/`rslave`.
    pub fn to_arg(&self) -> String {
        let mut bind = format!("{}:{}", self.host_path, self.container_path);
        let mut attrs = Vec::new();
        if self.read_only {
            attrs.push("ro");
        }
        if self.selinux_relabel {
            attrs.push("Z");
        }
        match self.propagation {
            MountPropagation::None => {}
            MountPropagation::Bidirectional => attrs.push("rshared"),
            MountPropagation::HostToContainer => attrs.push("rslave"),
        }
        if !attrs.is_empty() {
            bind.push(':');
            bind.push_str(&attrs.join(","));
        }
        format!("--volume={}", bind)
    }
}

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl PortProtocol {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Sctp => "SCTP",
        }
    }
}

/// A node port published on the host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Host address to listen on; empty means all addresses.
    #[serde(default)]
    pub listen_address: String,
    /// Port on the host.
    pub host_port: u16,
    /// Port inside the node.
    pub container_port: u16,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: PortProtocol,
}

impl PortMapping {
    /// TCP mapping of `host_port` on `listen_address` to `container_port`.
    pub fn tcp(listen_address: impl Into<String>, host_port: u16, container_port: u16) -> Self {
        Self {
            listen_address: listen_address.into(),
            host_port,
            container_port,
            protocol: PortProtocol::Tcp,
        }
    }

    /// Translate to a `--publish=` argument.
    pub fn to_arg(&self) -> String {
        let binding = if self.listen_address.is_empty() {
            self.host_port.to_string()
        } else {
            format!("{}:{}", bracket_host(&self.listen_address), self.host_port)
        };
        format!(
            "--publish={}:{}/{}",
            binding,
            self.container_port,
            self.protocol.as_str()
        )
    }
}

/// Wrap IPv6 literals in brackets so they can be joined with a port.
pub fn bracket_host(host: &str) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]", host),
        _ => host.to_string(),
    }
}

/// Fluent builder for a `run` invocation.
///
/// # Example
///
/// ```
/// use kinder_runtime::RunArgs;
///
/// let args = RunArgs::new()
///     .name("demo-control-plane")
///     .hostname("demo-control-plane")
///     .label("io.x-k8s.kind.cluster", "demo")
///     .privileged()
///     .image("kindest/node:v1.29.2")
///     .build();
/// assert_eq!(args.first().map(String::as_str), Some("run"));
/// assert_eq!(args.last().map(String::as_str), Some("kindest/node:v1.29.2"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    args: Vec<String>,
    image: String,
}

impl RunArgs {
    /// Start a detached run with a tty, as node entrypoints expect.
    pub fn new() -> Self {
        Self {
            args: vec!["--detach".into(), "--tty".into()],
            image: String::new(),
        }
    }

    /// Set the container name.
    pub fn name(mut self, name: &str) -> Self {
        self.args.extend(["--name".into(), name.into()]);
        self
    }

    /// Set the container hostname.
    pub fn hostname(mut self, hostname: &str) -> Self {
        self.args.extend(["--hostname".into(), hostname.into()]);
        self
    }

    /// Attach a `key=value` label.
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.args
            .extend(["--label".into(), format!("{}={}", key, value)]);
        self
    }

    /// Run privileged with seccomp disabled, required for nested containers.
    pub fn privileged(mut self) -> Self {
        self.args.extend([
            "--privileged".into(),
            "--security-opt".into(),
            "seccomp=unconfined".into(),
            "--security-opt".into(),
            "apparmor=unconfined".into(),
        ]);
        self
    }

    /// Mount a tmpfs at `path`.
    pub fn tmpfs(mut self, path: &str) -> Self {
        self.args.extend(["--tmpfs".into(), path.into()]);
        self
    }

    /// Add a raw `--volume` spec (anonymous volume or `src:dst[:opts]`).
    pub fn volume(mut self, spec: &str) -> Self {
        self.args.extend(["--volume".into(), spec.into()]);
        self
    }

    /// Add bind mounts.
    pub fn mounts<'a>(mut self, mounts: impl IntoIterator<Item = &'a Mount>) -> Self {
        self.args.extend(mounts.into_iter().map(Mount::to_arg));
        self
    }

    /// Add published ports.
    pub fn ports<'a>(mut self, ports: impl IntoIterator<Item = &'a PortMapping>) -> Self {
        self.args.extend(ports.into_iter().map(PortMapping::to_arg));
        self
    }

    /// Attach to a network at creation time.
    pub fn network(mut self, network: &str) -> Self {
        self.args.extend(["--network".into(), network.into()]);
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.args.extend(["-e".into(), format!("{}={}", key, value)]);
        self
    }

    /// Append pre-computed arguments verbatim.
    pub fn extra<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the image; always emitted last.
    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    /// Produce the full argument vector, starting with `run`.
    pub fn build(self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + 2);
        out.push("run".to_string());
        out.extend(self.args);
        out.push(self.image);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_plain() {
        assert_eq!(Mount::new("/a", "/b").to_arg(), "--volume=/a:/b");
    }

    #[test]
    fn test_mount_all_options() {
        let m = Mount {
            read_only: true,
            selinux_relabel: true,
            propagation: MountPropagation::Bidirectional,
            ..Mount::new("/host", "/node")
        };
        assert_eq!(m.to_arg(), "--volume=/host:/node:ro,Z,rshared");

        let m = Mount {
            propagation: MountPropagation::HostToContainer,
            ..Mount::new("/host", "/node")
        };
        assert_eq!(m.to_arg(), "--volume=/host:/node:rslave");
    }

    #[test]
    fn test_port_mapping_variants() {
        assert_eq!(
            PortMapping::tcp("127.0.0.1", 6443, 6443).to_arg(),
            "--publish=127.0.0.1:6443:6443/TCP"
        );
        assert_eq!(
            PortMapping::tcp("::1", 40000, 6443).to_arg(),
            "--publish=[::1]:40000:6443/TCP"
        );
        let udp = PortMapping {
            protocol: PortProtocol::Udp,
            ..PortMapping::tcp("", 53, 53)
        };
        assert_eq!(udp.to_arg(), "--publish=53:53/UDP");
    }

    #[test]
    fn test_run_args_order() {
        let args = RunArgs::new()
            .hostname("n")
            .name("n")
            .env("HTTP_PROXY", "http://proxy")
            .network("kind")
            .image("img")
            .build();
        assert_eq!(args[0], "run");
        assert_eq!(args.last().unwrap(), "img");
        assert!(args.windows(2).any(|w| w == ["-e", "HTTP_PROXY=http://proxy"]));
        assert!(args.windows(2).any(|w| w == ["--network", "kind"]));
    }

    #[test]
    fn test_bracket_host() {
        assert_eq!(bracket_host("::1"), "[::1]");
        assert_eq!(bracket_host("127.0.0.1"), "127.0.0.1");
        assert_eq!(bracket_host("localhost"), "localhost");
    }
}
