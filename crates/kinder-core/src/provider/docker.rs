//! Docker-flavoured provider.

use super::{Endpoint, Provider, CLUSTER_LABEL_KEY, NODE_ROLE_LABEL_KEY};
use crate::concurrent::{collect_all_errors, until_first_error};
use crate::config::{ClusterSpec, NodeRole};
use crate::error::{CoreError, Result, ResultExt};
use crate::loadbalancer::LOAD_BALANCER_IMAGE;
use crate::node::{api_server_endpoint_node, Node, API_SERVER_INTERNAL_PORT};
use crate::planner::{append_no_proxy, common_args, plan, proxy_vars, CreateOp, PortAllocator};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use kinder_runtime::{Engine, RuntimeError};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Provider driving a Docker-compatible CLI.
#[derive(Clone)]
pub struct DockerProvider {
    engine: Engine,
    env: EnvLookup,
}

impl fmt::Debug for DockerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerProvider")
            .field("engine", &self.engine)
            .finish()
    }
}

impl DockerProvider {
    /// Create a provider reading proxy settings from the process environment.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            env: Arc::new(|key: &str| std::env::var(key).ok()),
        }
    }

    /// Replace the environment lookup used for proxy settings.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    async fn ensure_images(&self, spec: &ClusterSpec) -> Result<()> {
        let mut images = spec.images();
        if spec.has_implicit_load_balancer() {
            images.insert(LOAD_BALANCER_IMAGE);
        }
        for image in images {
            self.engine
                .ensure_image(image)
                .await
                .with_context(|| format!("failed to pull image {image}"))?;
        }
        Ok(())
    }

    async fn common_args(&self, spec: &ClusterSpec) -> Result<Vec<String>> {
        let mut proxy = proxy_vars(|key| (self.env)(key));
        if !proxy.is_empty() {
            let subnets = self
                .engine
                .network_subnets(&spec.network)
                .await
                .context("proxy setup error")?;
            append_no_proxy(&mut proxy, &subnets);
        }
        let userns = match self.engine.userns_remap().await {
            Ok(remap) => remap,
            Err(e) => {
                tracing::warn!(error = %e, "Could not detect user namespace remapping");
                false
            }
        };
        Ok(common_args(spec, &proxy, userns))
    }
}

async fn create_node(engine: Engine, op: CreateOp) -> Result<()> {
    tracing::debug!(node = %op.name, role = %op.role, "Creating node");
    engine
        .run(op.args)
        .await
        .with_context(|| format!("docker run error for {}", op.name))?;
    for network in &op.extra_networks {
        engine
            .connect_network(network, &op.name)
            .await
            .with_context(|| format!("docker network connect error for {}", op.name))?;
    }
    Ok(())
}

async fn write_host_file(path: PathBuf, contents: Vec<u8>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

fn exec_to_file(
    node: Node,
    argv: &'static [&'static str],
    path: PathBuf,
) -> BoxFuture<'static, Result<()>> {
    async move {
        let out = node
            .exec(argv)
            .await
            .with_context(|| format!("{}: {}", node.name(), argv.join(" ")))?;
        let mut contents = out.stdout;
        contents.extend(out.stderr);
        write_host_file(path, contents).await
    }
    .boxed()
}

#[async_trait]
impl Provider for DockerProvider {
    fn name(&self) -> &str {
        self.engine.binary()
    }

    async fn provision(&self, spec: &ClusterSpec) -> Result<()> {
        spec.validate()?;
        self.ensure_images(spec).await?;
        self.engine
            .ensure_network(&spec.network, spec.is_ipv6())
            .await
            .context("failed to ensure docker network")?;

        let common = self.common_args(spec).await?;
        let ops = {
            // Ports are released here, right before the runtime binds them.
            let mut ports = PortAllocator::new();
            plan(spec, &common, &mut ports)?
        };

        tracing::info!(cluster = %spec.name, nodes = ops.len(), "Preparing nodes");
        let engine = self.engine.clone();
        until_first_error(ops.into_iter().map(|op| create_node(engine.clone(), op))).await
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        let lines = self
            .engine
            .list(
                &format!("label={CLUSTER_LABEL_KEY}"),
                &format!("{{{{.Label \"{CLUSTER_LABEL_KEY}\"}}}}"),
            )
            .await
            .context("failed to list clusters")?;
        let clusters: BTreeSet<String> = lines.into_iter().filter(|l| !l.is_empty()).collect();
        Ok(clusters.into_iter().collect())
    }

    async fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>> {
        let lines = self
            .engine
            .list(
                &format!("label={CLUSTER_LABEL_KEY}={cluster}"),
                &format!("{{{{.Names}}}}\t{{{{.Label \"{NODE_ROLE_LABEL_KEY}\"}}}}"),
            )
            .await
            .context("failed to list nodes")?;

        let mut nodes = Vec::with_capacity(lines.len());
        for line in lines {
            let parts: Vec<&str> = line.split('\t').collect();
            let [name, role] = parts.as_slice() else {
                return Err(RuntimeError::unexpected(
                    "docker ps",
                    format!("invalid output when listing nodes: {line:?}"),
                )
                .into());
            };
            let role: NodeRole = role.parse()?;
            nodes.push(Node::new(*name, role, self.engine.clone()));
        }
        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(nodes)
    }

    async fn delete_nodes(&self, nodes: &[Node]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = nodes.iter().map(|n| n.name().to_string()).collect();
        tracing::info!(nodes = ?names, "Deleting nodes");
        match self.engine.remove(&names).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = CoreError::from(e);
                if is_missing(&err, &names) {
                    tracing::warn!(error = %err, "Some nodes were already gone");
                    return Ok(());
                }
                Err(err.context("failed to delete nodes"))
            }
        }
    }

    async fn external_endpoint(&self, cluster: &str) -> Result<Endpoint> {
        let nodes = self.list_nodes(cluster).await?;
        let node = api_server_endpoint_node(&nodes).context("failed to get api server endpoint")?;

        let label_format = format!(
            "{{{{ index .Config.Labels \
             \"desktop.docker.io/ports/{API_SERVER_INTERNAL_PORT}/tcp\" }}}}"
        );
        let lines = self
            .engine
            .inspect_format(node.name(), &label_format)
            .await
            .context("failed to get api server port")?;
        if let [value] = lines.as_slice() {
            if !value.is_empty() {
                return Endpoint::parse(value).ok_or_else(|| {
                    RuntimeError::unexpected(
                        format!("inspect {}", node.name()),
                        format!("invalid desktop port label {value:?}"),
                    )
                    .into()
                });
            }
        }

        let (host, port) = node
            .port_binding(API_SERVER_INTERNAL_PORT)
            .await
            .context("failed to get api server port")?;
        Ok(Endpoint::new(host, port))
    }

    async fn internal_endpoint(&self, cluster: &str) -> Result<Endpoint> {
        let nodes = self.list_nodes(cluster).await?;
        let node = api_server_endpoint_node(&nodes).context("failed to get api server endpoint")?;
        // Node names double as hostnames on the cluster network.
        Ok(Endpoint::new(node.name(), API_SERVER_INTERNAL_PORT))
    }

    async fn collect_logs(&self, cluster: &str, dir: &Path) -> Result<()> {
        let nodes = self.list_nodes(cluster).await?;
        tokio::fs::create_dir_all(dir).await?;

        let mut ops: Vec<BoxFuture<'static, Result<()>>> = Vec::new();
        {
            let engine = self.engine.clone();
            let path = dir.join(format!("{}-info.txt", self.name()));
            ops.push(
                async move {
                    let out = engine.info(None).await.context("docker info")?;
                    write_host_file(path, out.stdout).await
                }
                .boxed(),
            );
        }

        for node in nodes {
            let path = dir.join(node.name());
            {
                let engine = self.engine.clone();
                let name = node.name().to_string();
                let path = path.join("inspect.json");
                ops.push(
                    async move {
                        let raw = engine
                            .inspect_raw(&name)
                            .await
                            .with_context(|| format!("docker inspect {name}"))?;
                        write_host_file(path, raw).await
                    }
                    .boxed(),
                );
            }
            {
                let node = node.clone();
                let path = path.join("serial.log");
                ops.push(
                    async move {
                        let logs = node
                            .serial_logs()
                            .await
                            .with_context(|| format!("docker logs {}", node.name()))?;
                        write_host_file(path, logs).await
                    }
                    .boxed(),
                );
            }
            ops.push(exec_to_file(
                node.clone(),
                &["cat", "/kind/version"],
                path.join("kubernetes-version.txt"),
            ));
            ops.push(exec_to_file(
                node.clone(),
                &["journalctl", "--no-pager"],
                path.join("journal.log"),
            ));
            ops.push(exec_to_file(
                node.clone(),
                &["journalctl", "--no-pager", "-u", "kubelet.service"],
                path.join("kubelet.log"),
            ));
            ops.push(exec_to_file(
                node.clone(),
                &["journalctl", "--no-pager", "-u", "containerd.service"],
                path.join("containerd.log"),
            ));
            ops.push(exec_to_file(
                node.clone(),
                &["crictl", "images"],
                path.join("images.log"),
            ));
            {
                let engine = self.engine.clone();
                let source = format!("{}:/var/log/.", node.name());
                let dest = path.join("var-log");
                ops.push(
                    async move {
                        tokio::fs::create_dir_all(&dest).await?;
                        let cmd = engine
                            .command()
                            .args(["cp", source.as_str()])
                            .arg(dest.to_string_lossy());
                        engine
                            .run_cmd(&cmd)
                            .await
                            .map(drop)
                            .with_context(|| format!("docker cp {source}"))
                    }
                    .boxed(),
                );
            }
        }

        tracing::info!(cluster, dir = %dir.display(), files = ops.len(), "Collecting logs");
        if let Err(agg) = collect_all_errors(ops).await {
            for e in agg.errors() {
                tracing::warn!(cluster, error = %e, "Log collection step failed");
            }
        }
        Ok(())
    }
}

/// True when the only failures `err` reports are nodes that are already gone.
///
/// A batch removal prints the names it did remove next to its errors, so
/// those lines are accepted too.
pub(crate) fn is_missing(err: &CoreError, names: &[String]) -> bool {
    let Some(RuntimeError::Invocation { output, .. }) = err.runtime() else {
        return false;
    };
    let mut missing = false;
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.contains("No such container") {
            missing = true;
        } else if !names.iter().any(|n| n == line) {
            return false;
        }
    }
    missing
}
