//! # kinder-core
//!
//! Cluster orchestration layer for kinder local Kubernetes clusters.
//!
//! Every Kubernetes node is a privileged container. This crate plans the
//! containers a cluster needs, creates them through a [`Provider`], then runs
//! the kubeadm bootstrap pipeline against them and exports a kubeconfig.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   kinder-core (host)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ ClusterManager  │────▶│  Provider                │   │
//! │  │   - create()    │     │   - provision()          │   │
//! │  │   - delete()    │     │   - list_nodes()         │   │
//! │  │   - kubeconfig()│     │   - delete_nodes()       │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │                          │                   │
//! │           ▼                          ▼                   │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │    Pipeline     │────▶│   Node                   │   │
//! │  │  config → lb →  │     │   - exec()               │   │
//! │  │  init → join    │     │   - read_file()          │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │                                      │                   │
//! └──────────────────────────────────────┼───────────────────┘
//!                                        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │             kinder-runtime (docker CLI)                  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use kinder_core::{ClusterManager, ClusterSpec, CreateOptions, DockerProvider};
//! use kinder_runtime::Engine;
//! use std::sync::Arc;
//!
//! # async fn example() -> kinder_core::Result<()> {
//! let provider = DockerProvider::new(Engine::docker(Arc::new(kinder_runtime::HostRunner)));
//! let manager = ClusterManager::new(Arc::new(provider));
//!
//! let spec = ClusterSpec::builder()
//!     .name("demo")
//!     .control_planes(1)
//!     .workers(2)
//!     .build()?;
//!
//! manager.create(spec, &CreateOptions::new("/tmp/demo.kubeconfig")).await?;
//! println!("{}", manager.server_address("demo").await?);
//!
//! manager.delete("demo").await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
mod cluster;
pub mod concurrent;
mod config;
mod error;
pub mod kubeconfig;
pub mod loadbalancer;
pub mod node;
pub mod planner;
pub mod provider;
mod version;

pub use actions::{ActionContext, LogStatus, Pipeline, PipelineState, Status};
pub use cluster::{ClusterManager, CreateOptions};
pub use config::{
    ClusterSpec, ClusterSpecBuilder, IpFamily, Networking, NodeRole, NodeSpec, DEFAULT_NETWORK,
    DEFAULT_NODE_IMAGE,
};
pub use error::{AggregateError, CoreError, Result, ResultExt};
pub use node::Node;
pub use provider::{DockerProvider, Endpoint, Provider};
pub use version::KubeVersion;
