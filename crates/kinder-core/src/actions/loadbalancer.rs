//! Load balancer configuration step.

use super::{Action, ActionContext};
use crate::error::{Result, ResultExt};
use crate::loadbalancer::{render_config, Backend, CONFIG_PATH};
use crate::node::{control_planes, external_load_balancer, API_SERVER_INTERNAL_PORT};
use async_trait::async_trait;
use kinder_runtime::RuntimeError;

/// Points the load balancer at every control plane and reloads it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadBalancerAction;

#[async_trait]
impl Action for LoadBalancerAction {
    fn label(&self) -> &str {
        "Configuring the external load balancer"
    }

    async fn execute(&self, ctx: &mut ActionContext) -> Result<()> {
        let nodes = ctx.nodes().await?;
        let Some(lb) = external_load_balancer(&nodes)? else {
            return Ok(());
        };

        let ipv6 = ctx.spec.is_ipv6();
        let network = ctx.spec.network.clone();
        let mut backends = Vec::new();
        for node in control_planes(&nodes) {
            let (v4, v6) = node
                .ip_addresses(&network)
                .await
                .with_context(|| format!("failed to get IP for node {}", node.name()))?;
            let address = if ipv6 { v6 } else { v4 };
            if address.is_empty() {
                return Err(RuntimeError::unexpected(
                    format!("inspect {}", node.name()),
                    format!(
                        "node {} has no {} address",
                        node.name(),
                        if ipv6 { "IPv6" } else { "IPv4" }
                    ),
                )
                .into());
            }
            backends.push(Backend {
                name: node.name().to_string(),
                address,
                port: API_SERVER_INTERNAL_PORT,
            });
        }

        let config = render_config(&backends, ipv6);
        lb.write_file(CONFIG_PATH, config)
            .await
            .context("failed to copy loadbalancer config to node")?;
        lb.exec(&["kill", "-s", "HUP", "1"])
            .await
            .context("failed to reload loadbalancer")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::config::{ClusterSpec, IpFamily, NodeRole};
    use crate::node::Node;
    use kinder_runtime::testing::{Reply, ScriptedRunner};
    use kinder_runtime::Engine;
    use std::sync::Arc;

    fn addresses() -> ScriptedRunner {
        ScriptedRunner::new().on_fn(["docker", "inspect", "--format"], |cmd| {
            match cmd.args.last().map(String::as_str) {
                Some("demo-control-plane") => Reply::stdout("kind,172.18.0.2,fc00:f853::2\n"),
                Some("demo-control-plane2") => Reply::stdout("kind,172.18.0.3,fc00:f853::3\n"),
                _ => Reply::stdout("kind,172.18.0.9,\n"),
            }
        })
    }

    fn ha_nodes(runner: &Arc<ScriptedRunner>) -> Vec<Node> {
        let engine = Engine::docker(runner.clone());
        vec![
            Node::new("demo-control-plane2", NodeRole::ControlPlane, engine.clone()),
            Node::new("demo-control-plane", NodeRole::ControlPlane, engine.clone()),
            Node::new(
                "demo-external-load-balancer",
                NodeRole::ExternalLoadBalancer,
                engine.clone(),
            ),
            Node::new("demo-worker", NodeRole::Worker, engine),
        ]
    }

    fn written_config(runner: &ScriptedRunner) -> String {
        let writes = runner.calls_matching([
            "docker",
            "exec",
            "-i",
            "demo-external-load-balancer",
            "cp",
        ]);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].args.last().unwrap(), CONFIG_PATH);
        String::from_utf8(writes[0].stdin.clone().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_configures_every_control_plane_and_reloads() {
        let runner = Arc::new(addresses());
        let spec = ClusterSpec::builder()
            .name("demo")
            .control_planes(2)
            .workers(1)
            .build()
            .unwrap();
        let mut ctx = context(StaticProvider::new(ha_nodes(&runner)), spec);

        LoadBalancerAction.execute(&mut ctx).await.unwrap();

        let cfg = written_config(&runner);
        assert!(cfg.contains("server demo-control-plane 172.18.0.2:6443"));
        assert!(cfg.contains("server demo-control-plane2 172.18.0.3:6443"));
        assert!(!cfg.contains("demo-worker"));
        let reload = runner.calls_matching([
            "docker",
            "exec",
            "demo-external-load-balancer",
            "kill",
            "-s",
            "HUP",
            "1",
        ]);
        assert_eq!(reload.len(), 1);
    }

    #[tokio::test]
    async fn test_ipv6_cluster_uses_v6_addresses() {
        let runner = Arc::new(addresses());
        let spec = ClusterSpec::builder()
            .name("demo")
            .control_planes(2)
            .ip_family(IpFamily::Ipv6)
            .build()
            .unwrap();
        let mut ctx = context(StaticProvider::new(ha_nodes(&runner)), spec);

        LoadBalancerAction.execute(&mut ctx).await.unwrap();

        let cfg = written_config(&runner);
        assert!(cfg.contains("server demo-control-plane [fc00:f853::2]:6443"));
        assert!(cfg.contains("bind :::6443"));
    }

    #[tokio::test]
    async fn test_missing_address_is_unexpected_output() {
        let runner = Arc::new(ScriptedRunner::new().on(["docker", "inspect"], "kind,,\n"));
        let spec = ClusterSpec::builder().name("demo").control_planes(2).build().unwrap();
        let mut ctx = context(StaticProvider::new(ha_nodes(&runner)), spec);

        let err = LoadBalancerAction.execute(&mut ctx).await.unwrap_err();
        assert!(err.runtime().unwrap().is_unexpected_output());
        assert!(runner.calls_matching(["docker", "exec"]).is_empty());
    }

    #[tokio::test]
    async fn test_extra_networks_use_cluster_network_address() {
        let runner = Arc::new(ScriptedRunner::new().on_fn(
            ["docker", "inspect", "--format"],
            |cmd| match cmd.args.last().map(String::as_str) {
                Some("demo-control-plane") => {
                    Reply::stdout("backend,172.19.0.2,\nkind,172.18.0.2,\n\n")
                }
                _ => Reply::stdout("kind,172.18.0.3,\nstorage,172.20.0.3,\n\n"),
            },
        ));
        let spec = ClusterSpec::builder().name("demo").control_planes(2).build().unwrap();
        let mut ctx = context(StaticProvider::new(ha_nodes(&runner)), spec);

        LoadBalancerAction.execute(&mut ctx).await.unwrap();

        let cfg = written_config(&runner);
        assert!(cfg.contains("server demo-control-plane 172.18.0.2:6443"));
        assert!(cfg.contains("server demo-control-plane2 172.18.0.3:6443"));
        assert!(!cfg.contains("172.19.0.2"));
        assert!(!cfg.contains("172.20.0.3"));
    }

    #[tokio::test]
    async fn test_no_load_balancer_is_noop() {
        let runner = Arc::new(ScriptedRunner::new());
        let nodes = vec![Node::new(
            "demo-control-plane",
            NodeRole::ControlPlane,
            Engine::docker(runner.clone()),
        )];
        let spec = ClusterSpec::builder().name("demo").control_planes(1).build().unwrap();
        let mut ctx = context(StaticProvider::new(nodes), spec);

        LoadBalancerAction.execute(&mut ctx).await.unwrap();
        assert!(runner.calls().is_empty());
    }
}
