//! kinder entry point.
//!
//! The first positional argument selects the command; everything else comes
//! from `KINDER_*` environment variables (see [`config::KinderConfig`]).
//!
//! ## Commands
//!
//! - **create**: provision and bootstrap the cluster
//! - **delete**: remove every node of the cluster
//! - **get-clusters**: print cluster names
//! - **get-nodes**: print node names of the cluster
//! - **get-kubeconfig** `[internal]`: print the admin kubeconfig
//! - **address**: print the API server URL
//! - **export-logs** `[dir]`: dump runtime and node logs

mod config;

use anyhow::Context;
use config::KinderConfig;
use kinder_core::{ClusterManager, CreateOptions, DockerProvider};
use kinder_runtime::{Engine, HostRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: kinder <create|delete|get-clusters|get-nodes|\
                     get-kubeconfig [internal]|address|export-logs [dir]>";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Create,
    Delete,
    GetClusters,
    GetNodes,
    GetKubeconfig { internal: bool },
    Address,
    ExportLogs { dir: Option<PathBuf> },
}

impl Command {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let first = args.first().map(String::as_str);
        let second = args.get(1).map(String::as_str);
        let command = match first {
            Some("create") => Self::Create,
            Some("delete") => Self::Delete,
            Some("get-clusters") => Self::GetClusters,
            Some("get-nodes") => Self::GetNodes,
            Some("get-kubeconfig") => Self::GetKubeconfig {
                internal: second == Some("internal"),
            },
            Some("address") => Self::Address,
            Some("export-logs") => Self::ExportLogs {
                dir: second.map(PathBuf::from),
            },
            Some(other) => anyhow::bail!("unknown command {other:?}\n{USAGE}"),
            None => anyhow::bail!("{USAGE}"),
        };
        Ok(command)
    }
}

fn default_logs_dir() -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    PathBuf::from(format!("./kinder-logs-{stamp}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("kinder=info".parse()?)
                .add_directive("kinder_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let config = KinderConfig::from_env();
    tracing::debug!(?config, "Configuration loaded");
    config.validate()?;

    let engine = Engine::docker(Arc::new(HostRunner));
    let manager = ClusterManager::new(Arc::new(DockerProvider::new(engine)));
    let name = config.name.as_str();

    match command {
        Command::Create => {
            let spec = config.to_spec()?;
            let options = CreateOptions::new(config.kubeconfig_path()).retain(config.retain);
            manager
                .create(spec, &options)
                .await
                .with_context(|| format!("failed to create cluster {name:?}"))?;
            println!("Cluster {name:?} created");
            println!(
                "kubectl --kubeconfig {} cluster-info",
                options.kubeconfig_path.display()
            );
        }
        Command::Delete => {
            manager
                .delete(name)
                .await
                .with_context(|| format!("failed to delete cluster {name:?}"))?;
        }
        Command::GetClusters => {
            let clusters = manager.list_clusters().await?;
            if clusters.is_empty() {
                tracing::info!("No kinder clusters found");
            }
            for cluster in clusters {
                println!("{cluster}");
            }
        }
        Command::GetNodes => {
            for node in manager.list_nodes(name).await? {
                println!("{}", node.name());
            }
        }
        Command::GetKubeconfig { internal } => {
            let kubeconfig = manager
                .kubeconfig(name, internal)
                .await
                .with_context(|| format!("failed to get kubeconfig for cluster {name:?}"))?;
            print!("{kubeconfig}");
        }
        Command::Address => {
            println!("{}", manager.server_address(name).await?);
        }
        Command::ExportLogs { dir } => {
            let dir = dir.unwrap_or_else(default_logs_dir);
            manager
                .export_logs(name, &dir)
                .await
                .with_context(|| format!("failed to export logs for cluster {name:?}"))?;
            println!("{}", dir.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&args(&["create"])).unwrap(), Command::Create);
        assert_eq!(
            Command::parse(&args(&["get-kubeconfig"])).unwrap(),
            Command::GetKubeconfig { internal: false }
        );
        assert_eq!(
            Command::parse(&args(&["get-kubeconfig", "internal"])).unwrap(),
            Command::GetKubeconfig { internal: true }
        );
        assert_eq!(
            Command::parse(&args(&["export-logs", "/tmp/logs"])).unwrap(),
            Command::ExportLogs {
                dir: Some(PathBuf::from("/tmp/logs"))
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(Command::parse(&args(&[])).is_err());
        let err = Command::parse(&args(&["destroy"])).unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }

    #[test]
    fn test_default_logs_dir_is_timestamped() {
        let dir = default_logs_dir();
        assert!(dir.to_string_lossy().starts_with("./kinder-logs-"));
    }
}
