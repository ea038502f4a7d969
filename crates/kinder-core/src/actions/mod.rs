//! Bootstrap action pipeline.
//!
//! A [`Pipeline`] runs its actions strictly in order against one shared
//! [`ActionContext`]. The first failing action stops the run; nothing is
//! retried or rolled back here.

mod config;
mod init;
mod join;
mod loadbalancer;

pub use config::{kubeadm_api_version, ConfigAction};
pub use init::{untaint_taints, InitAction};
pub use join::JoinAction;
pub use loadbalancer::LoadBalancerAction;

use crate::config::ClusterSpec;
use crate::error::{CoreError, Result};
use crate::node::Node;
use crate::provider::Provider;
use crate::version::KubeVersion;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// One named pipeline step.
#[async_trait]
pub trait Action: Send + Sync {
    /// Human-readable label reported when the step starts.
    fn label(&self) -> &str;

    /// Run the step.
    async fn execute(&self, ctx: &mut ActionContext) -> Result<()>;
}

/// Receives step start and end events.
pub trait Status: Send + Sync {
    fn start(&self, label: &str);
    fn end(&self, success: bool);
}

/// [`Status`] that reports through `tracing`.
#[derive(Debug, Default)]
pub struct LogStatus {
    current: std::sync::Mutex<Option<String>>,
}

impl LogStatus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Status for LogStatus {
    fn start(&self, label: &str) {
        tracing::info!(step = label, "Starting");
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(label.to_string());
    }

    fn end(&self, success: bool) {
        let label = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();
        if success {
            tracing::info!(step = %label, "Done");
        } else {
            tracing::error!(step = %label, "Failed");
        }
    }
}

/// State shared by every step of one pipeline run.
pub struct ActionContext {
    /// Cluster being bootstrapped.
    pub cluster_name: String,
    /// Where the host kubeconfig is written.
    pub kubeconfig_path: PathBuf,
    /// Topology the cluster was created from.
    pub spec: ClusterSpec,
    /// Token shared by the config and join steps.
    pub bootstrap_token: String,
    /// Kubernetes version of the node image, once read.
    pub kubernetes_version: Option<KubeVersion>,
    provider: Arc<dyn Provider>,
    nodes: Option<Vec<Node>>,
}

impl ActionContext {
    /// Context for bootstrapping `spec` with a freshly generated token.
    pub fn new(
        spec: ClusterSpec,
        provider: Arc<dyn Provider>,
        kubeconfig_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cluster_name: spec.name.clone(),
            kubeconfig_path: kubeconfig_path.into(),
            spec,
            bootstrap_token: generate_token(),
            kubernetes_version: None,
            provider,
            nodes: None,
        }
    }

    /// The provider backing the cluster.
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Cluster nodes. Listed once, then served from cache.
    pub async fn nodes(&mut self) -> Result<Vec<Node>> {
        if let Some(nodes) = &self.nodes {
            return Ok(nodes.clone());
        }
        let nodes = self.provider.list_nodes(&self.cluster_name).await?;
        self.nodes = Some(nodes.clone());
        Ok(nodes)
    }

    /// Kubernetes version, read from `node` when not yet known.
    pub async fn kubernetes_version(&mut self, node: &Node) -> Result<KubeVersion> {
        if let Some(v) = self.kubernetes_version {
            return Ok(v);
        }
        let v: KubeVersion = node.kubernetes_version().await?.parse()?;
        self.kubernetes_version = Some(v);
        Ok(v)
    }
}

/// Kubeadm bootstrap token: `[a-z0-9]{6}.[a-z0-9]{16}`.
pub fn generate_token() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}.{}", &hex[..6], &hex[6..22])
}

/// Where a pipeline run stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    /// Executing the step at this index.
    Running(usize),
    Succeeded,
    /// The step at `step` failed with `cause`.
    Failed { step: usize, cause: String },
}

/// Ordered, fail-fast sequence of actions.
pub struct Pipeline {
    actions: Vec<Box<dyn Action>>,
    status: Arc<dyn Status>,
    state: PipelineState,
}

impl Pipeline {
    /// Empty pipeline reporting to `status`.
    pub fn new(status: Arc<dyn Status>) -> Self {
        Self {
            actions: Vec::new(),
            status,
            state: PipelineState::Pending,
        }
    }

    /// The standard bootstrap sequence.
    pub fn bootstrap(status: Arc<dyn Status>) -> Self {
        Self::new(status)
            .with_action(ConfigAction)
            .with_action(LoadBalancerAction)
            .with_action(InitAction)
            .with_action(JoinAction::control_planes())
            .with_action(JoinAction::workers())
    }

    /// Append an action.
    pub fn with_action(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    /// Labels of every action, in order.
    pub fn labels(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.label()).collect()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Run every action in order, stopping at the first failure.
    pub async fn run(&mut self, ctx: &mut ActionContext) -> Result<()> {
        if self.state != PipelineState::Pending {
            return Err(CoreError::Validation(format!(
                "pipeline already ran ({:?})",
                self.state
            )));
        }

        for (index, action) in self.actions.iter().enumerate() {
            self.state = PipelineState::Running(index);
            let label = action.label().to_string();
            self.status.start(&label);

            if let Err(e) = action.execute(ctx).await {
                self.status.end(false);
                tracing::error!(step = %label, error = %e, "Pipeline step failed");
                self.state = PipelineState::Failed {
                    step: index,
                    cause: e.to_string(),
                };
                return Err(CoreError::Step {
                    step: label,
                    source: Box::new(e),
                });
            }
            self.status.end(true);
        }

        self.state = PipelineState::Succeeded;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Fake provider and status recorder shared by the action tests.

    use super::*;
    use crate::provider::Endpoint;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Debug)]
    pub struct StaticProvider {
        pub nodes: Vec<Node>,
        pub listed: Mutex<usize>,
    }

    impl StaticProvider {
        pub fn new(nodes: Vec<Node>) -> Arc<Self> {
            Arc::new(Self {
                nodes,
                listed: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }
        async fn provision(&self, _spec: &ClusterSpec) -> Result<()> {
            Ok(())
        }
        async fn list_clusters(&self) -> Result<Vec<String>> {
            Ok(vec!["demo".into()])
        }
        async fn list_nodes(&self, _cluster: &str) -> Result<Vec<Node>> {
            *self.listed.lock().unwrap() += 1;
            Ok(self.nodes.clone())
        }
        async fn delete_nodes(&self, _nodes: &[Node]) -> Result<()> {
            Ok(())
        }
        async fn external_endpoint(&self, _cluster: &str) -> Result<Endpoint> {
            Ok(Endpoint::new("127.0.0.1", 6443))
        }
        async fn internal_endpoint(&self, _cluster: &str) -> Result<Endpoint> {
            Ok(Endpoint::new("demo-control-plane", 6443))
        }
        async fn collect_logs(&self, _cluster: &str, _dir: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingStatus {
        pub events: Mutex<Vec<String>>,
    }

    impl Status for RecordingStatus {
        fn start(&self, label: &str) {
            self.events.lock().unwrap().push(format!("start:{label}"));
        }
        fn end(&self, success: bool) {
            self.events.lock().unwrap().push(format!("end:{success}"));
        }
    }

    pub fn context(provider: Arc<StaticProvider>, spec: ClusterSpec) -> ActionContext {
        ActionContext::new(spec, provider, "/tmp/kinder-test-kubeconfig")
    }
}
