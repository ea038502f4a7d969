//! `kubeadm join` steps.

use super::{Action, ActionContext};
use crate::error::{Result, ResultExt};
use crate::node::{bootstrap_control_plane, secondary_control_planes, workers, Node};
use async_trait::async_trait;

/// Cluster-wide key material every control plane must share.
const SHARED_PKI_FILES: [&str; 8] = [
    "/etc/kubernetes/pki/ca.crt",
    "/etc/kubernetes/pki/ca.key",
    "/etc/kubernetes/pki/front-proxy-ca.crt",
    "/etc/kubernetes/pki/front-proxy-ca.key",
    "/etc/kubernetes/pki/sa.pub",
    "/etc/kubernetes/pki/sa.key",
    "/etc/kubernetes/pki/etcd/ca.crt",
    "/etc/kubernetes/pki/etcd/ca.key",
];

const JOIN_ARGV: [&str; 5] = [
    "kubeadm",
    "join",
    "--config=/kind/kubeadm.conf",
    "--ignore-preflight-errors=all",
    "--v=6",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    ControlPlanes,
    Workers,
}

/// Joins either the secondary control planes or the workers, one node at a time.
#[derive(Debug, Clone, Copy)]
pub struct JoinAction {
    target: Target,
}

impl JoinAction {
    /// Join every control plane except the bootstrap one.
    pub fn control_planes() -> Self {
        Self {
            target: Target::ControlPlanes,
        }
    }

    /// Join every worker.
    pub fn workers() -> Self {
        Self {
            target: Target::Workers,
        }
    }
}

async fn copy_shared_pki(from: &Node, to: &Node) -> Result<()> {
    for path in SHARED_PKI_FILES {
        let contents = from
            .read_file(path)
            .await
            .with_context(|| format!("failed to read {path} from {}", from.name()))?;
        to.write_file(path, contents)
            .await
            .with_context(|| format!("failed to copy {path} to {}", to.name()))?;
    }
    Ok(())
}

async fn run_join(node: &Node) -> Result<()> {
    let out = node
        .exec(&JOIN_ARGV)
        .await
        .with_context(|| format!("failed to join node {} with kubeadm", node.name()))?;
    tracing::debug!(node = node.name(), output = %out.combined_lines().join("\n"), "kubeadm join");
    Ok(())
}

#[async_trait]
impl Action for JoinAction {
    fn label(&self) -> &str {
        match self.target {
            Target::ControlPlanes => "Joining more control-plane nodes",
            Target::Workers => "Joining worker nodes",
        }
    }

    async fn execute(&self, ctx: &mut ActionContext) -> Result<()> {
        let nodes = ctx.nodes().await?;
        match self.target {
            Target::ControlPlanes => {
                let secondary = secondary_control_planes(&nodes);
                if secondary.is_empty() {
                    return Ok(());
                }
                let bootstrap = bootstrap_control_plane(&nodes)?;
                for node in secondary {
                    copy_shared_pki(bootstrap, node).await?;
                    run_join(node).await?;
                }
            }
            Target::Workers => {
                for node in workers(&nodes) {
                    run_join(node).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::config::{ClusterSpec, NodeRole};
    use kinder_runtime::testing::ScriptedRunner;
    use kinder_runtime::Engine;
    use std::sync::Arc;

    fn spec() -> ClusterSpec {
        ClusterSpec::builder()
            .name("demo")
            .control_planes(3)
            .workers(2)
            .build()
            .unwrap()
    }

    fn nodes(runner: &Arc<ScriptedRunner>) -> Vec<Node> {
        let engine = Engine::docker(runner.clone());
        [
            ("demo-worker2", NodeRole::Worker),
            ("demo-control-plane3", NodeRole::ControlPlane),
            ("demo-control-plane", NodeRole::ControlPlane),
            ("demo-worker", NodeRole::Worker),
            ("demo-control-plane2", NodeRole::ControlPlane),
            ("demo-external-load-balancer", NodeRole::ExternalLoadBalancer),
        ]
        .into_iter()
        .map(|(name, role)| Node::new(name, role, engine.clone()))
        .collect()
    }

    fn joined(runner: &ScriptedRunner) -> Vec<String> {
        runner
            .calls()
            .into_iter()
            .filter(|c| c.args.iter().any(|a| a == "join"))
            .map(|c| c.args[1].clone())
            .collect()
    }

    #[tokio::test]
    async fn test_control_planes_get_pki_then_join_in_order() {
        let runner = Arc::new(ScriptedRunner::new().on(
            ["docker", "exec", "demo-control-plane", "cat"],
            "key material",
        ));
        let mut ctx = context(StaticProvider::new(nodes(&runner)), spec());

        JoinAction::control_planes().execute(&mut ctx).await.unwrap();

        assert_eq!(joined(&runner), vec!["demo-control-plane2", "demo-control-plane3"]);
        let copies = runner.calls_matching(["docker", "exec", "-i", "demo-control-plane2", "cp"]);
        assert_eq!(copies.len(), SHARED_PKI_FILES.len());
        assert_eq!(copies[0].stdin.as_deref(), Some(&b"key material"[..]));
        assert!(runner
            .calls_matching(["docker", "exec", "-i", "demo-worker"])
            .is_empty());
    }

    #[tokio::test]
    async fn test_workers_join_in_order() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut ctx = context(StaticProvider::new(nodes(&runner)), spec());

        JoinAction::workers().execute(&mut ctx).await.unwrap();

        assert_eq!(joined(&runner), vec!["demo-worker", "demo-worker2"]);
    }

    #[tokio::test]
    async fn test_join_failure_stops_remaining_nodes() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .fail_on(["docker", "exec", "demo-worker", "kubeadm"], "unauthorized"),
        );
        let mut ctx = context(StaticProvider::new(nodes(&runner)), spec());

        let err = JoinAction::workers().execute(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("failed to join node demo-worker"));
        assert_eq!(joined(&runner), vec!["demo-worker"]);
    }

    #[tokio::test]
    async fn test_single_control_plane_is_noop() {
        let runner = Arc::new(ScriptedRunner::new());
        let nodes = vec![Node::new(
            "demo-control-plane",
            NodeRole::ControlPlane,
            Engine::docker(runner.clone()),
        )];
        let spec = ClusterSpec::builder().name("demo").control_planes(1).build().unwrap();
        let mut ctx = context(StaticProvider::new(nodes), spec);
        JoinAction::control_planes().execute(&mut ctx).await.unwrap();
        assert!(runner.calls().is_empty());
    }
}
