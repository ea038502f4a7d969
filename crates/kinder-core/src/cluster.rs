//! Cluster lifecycle manager.

use crate::actions::{ActionContext, LogStatus, Pipeline, Status};
use crate::config::ClusterSpec;
use crate::error::{CoreError, Result};
use crate::kubeconfig;
use crate::node::{bootstrap_control_plane, Node};
use crate::provider::Provider;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options for [`ClusterManager::create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Keep nodes around when creation fails.
    pub retain: bool,
    /// Host path the kubeconfig is written to.
    pub kubeconfig_path: PathBuf,
}

impl CreateOptions {
    /// Options writing the kubeconfig to `kubeconfig_path`, cleaning up on failure.
    pub fn new(kubeconfig_path: impl Into<PathBuf>) -> Self {
        Self {
            retain: false,
            kubeconfig_path: kubeconfig_path.into(),
        }
    }

    /// Keep nodes after a failed create.
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Creates, inspects and deletes clusters through a single [`Provider`].
///
/// Neither the provider nor the bootstrap pipeline clean up after a failure.
/// That decision is made here, from [`CreateOptions::retain`].
pub struct ClusterManager {
    provider: Arc<dyn Provider>,
    status: Arc<dyn Status>,
}

impl ClusterManager {
    /// Manager reporting pipeline progress through `tracing`.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self::with_status(provider, Arc::new(LogStatus::new()))
    }

    /// Manager reporting pipeline progress to `status`.
    pub fn with_status(provider: Arc<dyn Provider>, status: Arc<dyn Status>) -> Self {
        tracing::debug!(provider = provider.name(), "Creating cluster manager");
        Self { provider, status }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Provision the nodes of `spec` and bootstrap Kubernetes on them.
    pub async fn create(&self, spec: ClusterSpec, options: &CreateOptions) -> Result<()> {
        spec.validate()?;
        let name = spec.name.clone();
        if self.provider.list_clusters().await?.contains(&name) {
            return Err(CoreError::ClusterExists(name));
        }

        tracing::info!(cluster = %name, nodes = spec.nodes.len(), "Creating cluster");
        let result = self.provision_and_bootstrap(spec, options).await;
        if let Err(e) = &result {
            tracing::error!(cluster = %name, error = %e, "Cluster creation failed");
            if options.retain {
                tracing::warn!(cluster = %name, "Retaining nodes after failure");
            } else if let Err(cleanup) = self.delete(&name).await {
                tracing::warn!(cluster = %name, error = %cleanup, "Failed to clean up nodes");
            }
        } else {
            tracing::info!(
                cluster = %name,
                kubeconfig = %options.kubeconfig_path.display(),
                "Cluster created"
            );
        }
        result
    }

    async fn provision_and_bootstrap(
        &self,
        spec: ClusterSpec,
        options: &CreateOptions,
    ) -> Result<()> {
        self.provider.provision(&spec).await?;
        let mut ctx = ActionContext::new(spec, self.provider.clone(), &options.kubeconfig_path);
        Pipeline::bootstrap(self.status.clone()).run(&mut ctx).await
    }

    /// Delete every node of cluster `name`. Deleting an absent cluster is a no-op.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let nodes = self.provider.list_nodes(name).await?;
        if nodes.is_empty() {
            tracing::info!(cluster = %name, "No nodes to delete");
            return Ok(());
        }
        tracing::info!(cluster = %name, nodes = nodes.len(), "Deleting cluster");
        self.provider.delete_nodes(&nodes).await
    }

    pub async fn list_clusters(&self) -> Result<Vec<String>> {
        self.provider.list_clusters().await
    }

    pub async fn list_nodes(&self, name: &str) -> Result<Vec<Node>> {
        self.provider.list_nodes(name).await
    }

    /// Admin kubeconfig of cluster `name`, pointed at the host-published
    /// endpoint or, with `internal`, at the endpoint inside the cluster network.
    pub async fn kubeconfig(&self, name: &str, internal: bool) -> Result<String> {
        let nodes = self.provider.list_nodes(name).await?;
        let node = bootstrap_control_plane(&nodes)?;
        let raw = kubeconfig::read_admin(node).await?;

        let server = if internal {
            format!("https://{}", self.provider.internal_endpoint(name).await?)
        } else {
            kubeconfig::localhost_server(self.provider.external_endpoint(name).await?.port)
        };
        let rewritten = kubeconfig::rewrite_server(&raw, name, &server)?;
        String::from_utf8(rewritten)
            .map_err(|e| CoreError::Kubeconfig(format!("kubeconfig is not UTF-8: {e}")))
    }

    /// `https://` URL of the API server as seen from the host.
    pub async fn server_address(&self, name: &str) -> Result<String> {
        Ok(format!("https://{}", self.provider.external_endpoint(name).await?))
    }

    /// Collect runtime and node logs of cluster `name` into `dir`.
    pub async fn export_logs(&self, name: &str, dir: &Path) -> Result<()> {
        let nodes = self.provider.list_nodes(name).await?;
        if nodes.is_empty() {
            return Err(CoreError::NodeNotFound(format!("no nodes found for cluster {name:?}")));
        }
        tokio::fs::create_dir_all(dir).await?;
        self.provider.collect_logs(name, dir).await?;
        tracing::info!(cluster = %name, dir = %dir.display(), "Exported logs");
        Ok(())
    }
}
