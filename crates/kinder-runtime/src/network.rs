//! Network management for node sandboxes.
//!
//! The backing network is shared by every node of every cluster. Creation is
//! guarded by an existence check rather than a lock, so two concurrent callers
//! may both try to create it; the loser re-checks and accepts the winner's
//! network.

use crate::engine::Engine;
use crate::error::{Result, RuntimeError};

/// Label placed on networks created by kinder.
pub const NETWORK_LABEL_KEY: &str = "io.x-k8s.kind.network";

impl Engine {
    /// Whether a network with this exact name exists.
    pub async fn network_exists(&self, name: &str) -> bool {
        let cmd = self
            .command()
            .args(["network", "inspect", "--format", "{{.Name}}", name]);
        match self.run_cmd(&cmd).await {
            Ok(out) => out.lines().iter().any(|l| l == name),
            Err(_) => false,
        }
    }

    /// Create a labelled bridge network.
    pub async fn create_network(&self, name: &str, ipv6: bool) -> Result<()> {
        let label = format!("--label={}={}", NETWORK_LABEL_KEY, name);
        let mut cmd = self
            .command()
            .args(["network", "create", "--driver=bridge", label.as_str()]);
        if ipv6 {
            cmd = cmd.arg("--ipv6");
        }
        cmd = cmd.arg(name);
        self.run_cmd(&cmd).await?;
        Ok(())
    }

    /// Ensure the network exists, creating it at most once.
    ///
    /// A pre-existing network with the same name is reused as-is.
    pub async fn ensure_network(&self, name: &str, ipv6: bool) -> Result<()> {
        if self.network_exists(name).await {
            tracing::debug!(network = name, "Reusing existing network");
            return Ok(());
        }

        tracing::info!(network = name, ipv6, "Creating network");
        if let Err(e) = self.create_network(name, ipv6).await {
            // Someone else may have created it between our check and create.
            if self.network_exists(name).await {
                tracing::debug!(network = name, error = %e, "Network created concurrently");
                return Ok(());
            }
            return Err(e);
        }
        Ok(())
    }

    /// Attach an existing container to an additional network.
    pub async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        let cmd = self
            .command()
            .args(["network", "connect", network, container]);
        self.run_cmd(&cmd).await?;
        Ok(())
    }

    /// Subnets configured on a network, in IPAM order.
    pub async fn network_subnets(&self, name: &str) -> Result<Vec<String>> {
        let cmd = self.command().args([
            "network",
            "inspect",
            "--format",
            "{{range .IPAM.Config}}{{.Subnet}} {{end}}",
            name,
        ]);
        let out = self.run_cmd(&cmd).await?;
        let lines = out.lines();
        if lines.len() != 1 {
            return Err(RuntimeError::unexpected(
                &cmd,
                format!("expected 1 line of subnets, got {}", lines.len()),
            ));
        }
        Ok(lines[0].split_whitespace().map(str::to_string).collect())
    }
}
