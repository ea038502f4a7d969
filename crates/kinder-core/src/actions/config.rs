//! Kubeadm configuration step.

use super::{Action, ActionContext};
use crate::config::{ClusterSpec, NodeRole};
use crate::error::{Result, ResultExt};
use crate::node::{
    api_server_endpoint_node, bootstrap_control_plane, Node, API_SERVER_INTERNAL_PORT,
    KUBEADM_CONFIG_PATH,
};
use crate::version::KubeVersion;
use async_trait::async_trait;
use kinder_runtime::bracket_host;
use serde_json::json;

/// Kubeadm config API group version understood by `version`.
pub fn kubeadm_api_version(version: &KubeVersion) -> &'static str {
    if version.lt_minor(1, 15) {
        "kubeadm.k8s.io/v1beta1"
    } else if version.lt_minor(1, 23) {
        "kubeadm.k8s.io/v1beta2"
    } else {
        "kubeadm.k8s.io/v1beta3"
    }
}

/// Inputs for one node's kubeadm config.
#[derive(Debug, Clone)]
pub struct KubeadmParams<'a> {
    pub spec: &'a ClusterSpec,
    pub version: KubeVersion,
    pub node_name: &'a str,
    pub role: NodeRole,
    pub control_plane_endpoint: String,
    pub token: &'a str,
}

/// Render the multi-document kubeadm config for one node.
pub fn render_kubeadm_config(p: &KubeadmParams<'_>) -> Result<String> {
    let api_version = kubeadm_api_version(&p.version);
    let mut cert_sans = vec!["localhost", "127.0.0.1"];
    if p.spec.is_ipv6() {
        cert_sans.push("::1");
    }

    let cluster = json!({
        "apiVersion": api_version,
        "kind": "ClusterConfiguration",
        "clusterName": p.spec.name,
        "kubernetesVersion": p.version.to_string(),
        "controlPlaneEndpoint": p.control_plane_endpoint,
        "apiServer": { "certSANs": cert_sans },
        "networking": {
            "podSubnet": p.spec.networking.pod_subnet,
            "serviceSubnet": p.spec.networking.service_subnet,
        },
    });
    let init = json!({
        "apiVersion": api_version,
        "kind": "InitConfiguration",
        "bootstrapTokens": [{ "token": p.token }],
        "localAPIEndpoint": { "bindPort": API_SERVER_INTERNAL_PORT },
        "nodeRegistration": { "name": p.node_name },
    });
    let mut join = json!({
        "apiVersion": api_version,
        "kind": "JoinConfiguration",
        "discovery": {
            "bootstrapToken": {
                "apiServerEndpoint": p.control_plane_endpoint,
                "token": p.token,
                "unsafeSkipCAVerification": true,
            },
        },
        "nodeRegistration": { "name": p.node_name },
    });
    if p.role == NodeRole::ControlPlane {
        join["controlPlane"] = json!({
            "localAPIEndpoint": { "bindPort": API_SERVER_INTERNAL_PORT },
        });
    }

    let docs = [cluster, init, join]
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

/// Writes `/kind/kubeadm.conf` into every kubeadm-managed node.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigAction;

#[async_trait]
impl Action for ConfigAction {
    fn label(&self) -> &str {
        "Writing configuration"
    }

    async fn execute(&self, ctx: &mut ActionContext) -> Result<()> {
        let nodes = ctx.nodes().await?;
        let bootstrap = bootstrap_control_plane(&nodes)?;
        let version = ctx
            .kubernetes_version(bootstrap)
            .await
            .context("failed to get kubernetes version from node")?;
        let endpoint_node = api_server_endpoint_node(&nodes)?;
        let control_plane_endpoint = format!(
            "{}:{}",
            bracket_host(endpoint_node.name()),
            API_SERVER_INTERNAL_PORT
        );
        tracing::debug!(
            %version,
            api = kubeadm_api_version(&version),
            endpoint = %control_plane_endpoint,
            "Rendering kubeadm config"
        );

        let targets: Vec<&Node> = nodes
            .iter()
            .filter(|n| n.role() != NodeRole::ExternalLoadBalancer)
            .collect();
        for node in targets {
            let config = render_kubeadm_config(&KubeadmParams {
                spec: &ctx.spec,
                version,
                node_name: node.name(),
                role: node.role(),
                control_plane_endpoint: control_plane_endpoint.clone(),
                token: &ctx.bootstrap_token,
            })?;
            node.write_file(KUBEADM_CONFIG_PATH, config)
                .await
                .with_context(|| format!("failed to copy kubeadm config to node {}", node.name()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use kinder_runtime::testing::ScriptedRunner;
    use kinder_runtime::Engine;
    use serde_yaml::Value;
    use std::sync::Arc;

    fn spec() -> ClusterSpec {
        ClusterSpec::builder().name("demo").control_planes(1).build().unwrap()
    }

    #[test]
    fn test_api_version_boundaries() {
        let v = |minor| KubeVersion::new(1, minor, 0);
        assert_eq!(kubeadm_api_version(&v(14)), "kubeadm.k8s.io/v1beta1");
        assert_eq!(kubeadm_api_version(&v(15)), "kubeadm.k8s.io/v1beta2");
        assert_eq!(kubeadm_api_version(&v(22)), "kubeadm.k8s.io/v1beta2");
        assert_eq!(kubeadm_api_version(&v(23)), "kubeadm.k8s.io/v1beta3");
        assert_eq!(kubeadm_api_version(&v(29)), "kubeadm.k8s.io/v1beta3");
    }

    #[test]
    fn test_render_documents() {
        let spec = spec();
        let rendered = render_kubeadm_config(&KubeadmParams {
            spec: &spec,
            version: KubeVersion::new(1, 29, 2),
            node_name: "demo-worker",
            role: NodeRole::Worker,
            control_plane_endpoint: "demo-control-plane:6443".into(),
            token: "abcdef.0123456789abcdef",
        })
        .unwrap();

        let docs: Vec<Value> = rendered
            .split("---\n")
            .map(|d| serde_yaml::from_str(d).unwrap())
            .collect();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["kind"].as_str(), Some("ClusterConfiguration"));
        assert_eq!(docs[0]["clusterName"].as_str(), Some("demo"));
        assert_eq!(docs[0]["networking"]["podSubnet"].as_str(), Some("10.244.0.0/16"));
        assert_eq!(
            docs[1]["bootstrapTokens"][0]["token"].as_str(),
            Some("abcdef.0123456789abcdef")
        );
        assert_eq!(
            docs[2]["discovery"]["bootstrapToken"]["apiServerEndpoint"].as_str(),
            Some("demo-control-plane:6443")
        );
        assert!(docs[2].get("controlPlane").is_none());
        assert!(docs
            .iter()
            .all(|d| d["apiVersion"].as_str() == Some("kubeadm.k8s.io/v1beta3")));
    }

    #[test]
    fn test_render_control_plane_join_section() {
        let spec = spec();
        let rendered = render_kubeadm_config(&KubeadmParams {
            spec: &spec,
            version: KubeVersion::new(1, 20, 0),
            node_name: "demo-control-plane2",
            role: NodeRole::ControlPlane,
            control_plane_endpoint: "demo-external-load-balancer:6443".into(),
            token: "abcdef.0123456789abcdef",
        })
        .unwrap();
        let join: Value = serde_yaml::from_str(rendered.split("---\n").nth(2).unwrap()).unwrap();
        assert_eq!(
            join["controlPlane"]["localAPIEndpoint"]["bindPort"].as_u64(),
            Some(6443)
        );
        assert_eq!(join["apiVersion"].as_str(), Some("kubeadm.k8s.io/v1beta2"));
    }

    #[tokio::test]
    async fn test_config_action_writes_every_kubeadm_node() {
        let runner = Arc::new(ScriptedRunner::new().on(
            ["docker", "exec", "demo-control-plane", "cat", "/kind/version"],
            "v1.29.2\n",
        ));
        let engine = Engine::docker(runner.clone());
        let nodes = vec![
            Node::new("demo-control-plane", NodeRole::ControlPlane, engine.clone()),
            Node::new("demo-control-plane2", NodeRole::ControlPlane, engine.clone()),
            Node::new(
                "demo-external-load-balancer",
                NodeRole::ExternalLoadBalancer,
                engine.clone(),
            ),
            Node::new("demo-worker", NodeRole::Worker, engine),
        ];
        let mut ctx = context(StaticProvider::new(nodes), spec());

        ConfigAction.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.kubernetes_version, Some(KubeVersion::new(1, 29, 2)));
        let writes = runner.calls_matching(["docker", "exec", "-i"]);
        let targets: Vec<&str> = writes.iter().map(|c| c.args[2].as_str()).collect();
        assert_eq!(
            targets,
            vec!["demo-control-plane", "demo-control-plane2", "demo-worker"]
        );
        let body = String::from_utf8(writes[0].stdin.clone().unwrap()).unwrap();
        assert!(body.contains("demo-external-load-balancer:6443"));
        assert!(body.contains(&ctx.bootstrap_token));
    }

    #[tokio::test]
    async fn test_config_action_bad_version() {
        let runner = Arc::new(ScriptedRunner::new().on(["docker", "exec"], "latest\n"));
        let nodes = vec![Node::new(
            "demo-control-plane",
            NodeRole::ControlPlane,
            Engine::docker(runner),
        )];
        let mut ctx = context(StaticProvider::new(nodes), spec());
        let err = ConfigAction.execute(&mut ctx).await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("failed to get kubernetes version from node"));
    }
}
