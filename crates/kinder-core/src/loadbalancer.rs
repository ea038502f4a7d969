//! External load balancer constants and haproxy configuration rendering.

use kinder_runtime::bracket_host;
use std::fmt::Write;

/// Image the load balancer node runs.
pub const LOAD_BALANCER_IMAGE: &str = "kindest/haproxy:v20230606-42a2262b";

/// Port haproxy listens on inside the load balancer node.
pub const CONTROL_PLANE_PORT: u16 = 6443;

/// haproxy configuration path inside the load balancer node.
pub const CONFIG_PATH: &str = "/usr/local/etc/haproxy/haproxy.cfg";

/// One API server backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Server name, the node name.
    pub name: String,
    /// Node address on the cluster network.
    pub address: String,
    /// API server port on that address.
    pub port: u16,
}

/// Render the haproxy configuration balancing across `backends`.
pub fn render_config(backends: &[Backend], ipv6: bool) -> String {
    let mut cfg = String::from(
        "# generated by kinder
global
  log /dev/log local0
  log /dev/log local1 notice
  daemon
  maxconn 100000

resolvers docker
  nameserver dns 127.0.0.11:53

defaults
  log global
  mode tcp
  option dontlognull
  timeout connect 5000
  timeout client 50000
  timeout server 50000
  default-server init-addr none

frontend control-plane
",
    );
    let _ = writeln!(cfg, "  bind *:{CONTROL_PLANE_PORT}");
    if ipv6 {
        let _ = writeln!(cfg, "  bind :::{CONTROL_PLANE_PORT}");
    }
    cfg.push_str(
        "  default_backend kube-apiservers

backend kube-apiservers
  option httpchk GET /healthz
",
    );
    let family = if ipv6 { "ipv6" } else { "ipv4" };
    for b in backends {
        let _ = writeln!(
            cfg,
            "  server {} {}:{} check check-ssl verify none resolvers docker resolve-prefer {}",
            b.name,
            bracket_host(&b.address),
            b.port,
            family
        );
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str, address: &str) -> Backend {
        Backend {
            name: name.into(),
            address: address.into(),
            port: 6443,
        }
    }

    #[test]
    fn test_render_lists_every_backend() {
        let cfg = render_config(
            &[
                backend("demo-control-plane", "172.18.0.2"),
                backend("demo-control-plane2", "172.18.0.3"),
            ],
            false,
        );
        assert!(cfg.contains("bind *:6443\n"));
        assert!(!cfg.contains("bind :::6443"));
        assert!(cfg.contains("server demo-control-plane 172.18.0.2:6443 check"));
        assert!(cfg.contains("server demo-control-plane2 172.18.0.3:6443 check"));
        assert!(cfg.contains("resolve-prefer ipv4"));
    }

    #[test]
    fn test_render_ipv6_brackets_addresses() {
        let cfg = render_config(&[backend("demo-control-plane", "fc00:f853::2")], true);
        assert!(cfg.contains("bind :::6443"));
        assert!(cfg.contains("server demo-control-plane [fc00:f853::2]:6443"));
        assert!(cfg.contains("resolve-prefer ipv6"));
    }
}
