//! `kubeadm init` step.

use super::{Action, ActionContext};
use crate::error::{Result, ResultExt};
use crate::kubeconfig;
use crate::loadbalancer::CONTROL_PLANE_PORT;
use crate::node::{bootstrap_control_plane, external_load_balancer, Node, API_SERVER_INTERNAL_PORT};
use crate::version::KubeVersion;
use async_trait::async_trait;

const MASTER_TAINT: &str = "node-role.kubernetes.io/master-";
const CONTROL_PLANE_TAINT: &str = "node-role.kubernetes.io/control-plane-";

/// Taints to remove so a single-node cluster can schedule workloads.
pub fn untaint_taints(version: &KubeVersion) -> Vec<&'static str> {
    if version.lt_minor(1, 24) {
        vec![MASTER_TAINT]
    } else if version.lt_minor(1, 25) {
        vec![CONTROL_PLANE_TAINT, MASTER_TAINT]
    } else {
        vec![CONTROL_PLANE_TAINT]
    }
}

/// Host port the API server is published on: the load balancer's when one
/// exists, else the bootstrap control plane's.
pub async fn api_server_host_port(nodes: &[Node]) -> Result<u16> {
    if let Some(lb) = external_load_balancer(nodes)? {
        return lb.host_port(CONTROL_PLANE_PORT).await;
    }
    bootstrap_control_plane(nodes)?
        .host_port(API_SERVER_INTERNAL_PORT)
        .await
}

/// Runs `kubeadm init` on the bootstrap control plane and exports the
/// kubeconfig.
#[derive(Debug, Default, Clone, Copy)]
pub struct InitAction;

#[async_trait]
impl Action for InitAction {
    fn label(&self) -> &str {
        "Starting control-plane"
    }

    async fn execute(&self, ctx: &mut ActionContext) -> Result<()> {
        let nodes = ctx.nodes().await?;
        let node = bootstrap_control_plane(&nodes)?;

        let out = node
            .exec(&[
                "kubeadm",
                "init",
                "--ignore-preflight-errors=all",
                "--config=/kind/kubeadm.conf",
                "--skip-token-print",
                "--v=6",
            ])
            .await
            .context("failed to init node with kubeadm")?;
        tracing::debug!(
            node = node.name(),
            output = %out.combined_lines().join("\n"),
            "kubeadm init"
        );

        if nodes.len() == 1 {
            let version = ctx.kubernetes_version(node).await?;
            let mut argv = vec![
                "kubectl",
                "--kubeconfig=/etc/kubernetes/admin.conf",
                "taint",
                "nodes",
                "--all",
            ];
            argv.extend(untaint_taints(&version));
            node.exec(&argv)
                .await
                .context("failed to remove control plane taint")?;
        }

        let port = api_server_host_port(&nodes)
            .await
            .context("failed to get api server port")?;
        kubeconfig::materialize(node, &ctx.kubeconfig_path, port, &ctx.cluster_name).await
    }
}
