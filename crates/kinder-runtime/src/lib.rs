//! # kinder-runtime
//!
//! Container runtime layer for kinder clusters.
//! Drives a Docker-compatible CLI to create, inspect and remove the
//! sandboxes that stand in for cluster nodes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kinder_runtime::{Engine, HostRunner, RunArgs};
//! use std::sync::Arc;
//!
//! # async fn example() -> kinder_runtime::Result<()> {
//! let engine = Engine::docker(Arc::new(HostRunner));
//! engine.ensure_network("kind", false).await?;
//!
//! let args = RunArgs::new()
//!     .name("demo-control-plane")
//!     .hostname("demo-control-plane")
//!     .privileged()
//!     .network("kind")
//!     .image("kindest/node:v1.29.2")
//!     .build();
//! engine.run(args).await?;
//!
//! // Cleanup
//! engine.remove(&["demo-control-plane".to_string()]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Command Runner**: `Runner` trait with a `tokio::process` host implementation
//! - **Output Shape Checks**: wrong line or field counts surface as `UnexpectedOutput`
//! - **Run Arguments**: `RunArgs` builder with mount and port translation
//! - **Networks**: idempotent network creation tolerant of concurrent creators
//! - **Test Fake**: `testing::ScriptedRunner` behind the `test-util` feature

mod args;
mod cmd;
mod engine;
mod error;
mod network;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use args::{bracket_host, Mount, MountPropagation, PortMapping, PortProtocol, RunArgs};
pub use cmd::{single_line, Cmd, HostRunner, Output, Runner};
pub use engine::Engine;
pub use error::{Result, RuntimeError};
pub use network::NETWORK_LABEL_KEY;
