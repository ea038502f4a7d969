//! Engine type - the container runtime CLI that backs every node.

use crate::cmd::{single_line, Cmd, Output, Runner};
use crate::error::{Result, RuntimeError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Number of attempts made by [`Engine::pull`].
const PULL_ATTEMPTS: u32 = 4;

/// Base delay between pull attempts; attempt `n` waits `n * PULL_BACKOFF`.
const PULL_BACKOFF: Duration = Duration::from_secs(1);

/// Handle to a Docker-compatible container runtime CLI.
///
/// Cheap to clone; all clones share the same [`Runner`].
#[derive(Clone)]
pub struct Engine {
    binary: String,
    runner: Arc<dyn Runner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("binary", &self.binary)
            .finish()
    }
}

impl Engine {
    /// Create an engine invoking `binary` through `runner`.
    pub fn new(binary: impl Into<String>, runner: Arc<dyn Runner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    /// Engine driving the `docker` CLI.
    pub fn docker(runner: Arc<dyn Runner>) -> Self {
        Self::new("docker", runner)
    }

    /// Name of the runtime binary.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Start building a runtime command.
    pub fn command(&self) -> Cmd {
        Cmd::new(&self.binary)
    }

    /// Run a runtime command built with [`Engine::command`].
    pub async fn run_cmd(&self, cmd: &Cmd) -> Result<Output> {
        self.runner.run(cmd).await
    }

    /// Create and start a container from a `run ...` argument vector.
    pub async fn run(&self, args: Vec<String>) -> Result<()> {
        let cmd = self.command().args(args);
        self.run_cmd(&cmd).await?;
        Ok(())
    }

    /// Force-remove containers together with their anonymous volumes.
    pub async fn remove(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let cmd = self
            .command()
            .args(["rm", "-f", "-v"])
            .args(names.iter().cloned());
        self.run_cmd(&cmd).await?;
        Ok(())
    }

    /// List containers (running or stopped) matching `filter`, one formatted line each.
    pub async fn list(&self, filter: &str, format: &str) -> Result<Vec<String>> {
        let cmd = self
            .command()
            .args(["ps", "-a", "--filter", filter, "--format", format]);
        Ok(self.run_cmd(&cmd).await?.lines())
    }

    /// Inspect an object with a Go template, returning every output line.
    pub async fn inspect_format(&self, target: &str, format: &str) -> Result<Vec<String>> {
        let cmd = self.command().args(["inspect", "--format", format, target]);
        Ok(self.run_cmd(&cmd).await?.lines())
    }

    /// Inspect an object with a Go template that must yield exactly one line.
    pub async fn inspect_line(&self, target: &str, format: &str) -> Result<String> {
        let cmd = self.command().args(["inspect", "--format", format, target]);
        let out = self.run_cmd(&cmd).await?;
        single_line(&cmd, &out)
    }

    /// Full JSON inspection of an object.
    pub async fn inspect_raw(&self, target: &str) -> Result<Vec<u8>> {
        let cmd = self.command().args(["inspect", target]);
        Ok(self.run_cmd(&cmd).await?.stdout)
    }

    /// Execute `argv` inside a running container, optionally feeding stdin.
    pub async fn exec(
        &self,
        container: &str,
        argv: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<Output> {
        let mut cmd = self.command().arg("exec");
        if stdin.is_some() {
            cmd = cmd.arg("-i");
        }
        cmd = cmd.arg(container).args(argv.iter().copied());
        if let Some(input) = stdin {
            cmd = cmd.stdin(input);
        }
        self.run_cmd(&cmd).await
    }

    /// Container console output.
    pub async fn logs(&self, container: &str) -> Result<Output> {
        let cmd = self.command().args(["logs", container]);
        self.run_cmd(&cmd).await
    }

    /// Runtime-wide information, optionally formatted.
    pub async fn info(&self, format: Option<&str>) -> Result<Output> {
        let mut cmd = self.command().arg("info");
        if let Some(format) = format {
            cmd = cmd.args(["--format", format]);
        }
        self.run_cmd(&cmd).await
    }

    /// Whether the runtime reports user-namespace remapping.
    pub async fn userns_remap(&self) -> Result<bool> {
        let cmd = self
            .command()
            .args(["info", "--format", "{{json .SecurityOptions}}"]);
        let out = self.run_cmd(&cmd).await?;
        let text = out.stdout_str();
        let options: Vec<String> = serde_json::from_str(text.trim()).map_err(|e| {
            RuntimeError::unexpected(&cmd, format!("security options are not a JSON list: {e}"))
        })?;
        Ok(options.iter().any(|o| o.contains("name=userns")))
    }

    /// Whether an image is already present locally.
    pub async fn image_present(&self, image: &str) -> bool {
        let cmd = self
            .command()
            .args(["inspect", "--type=image", image]);
        self.run_cmd(&cmd).await.is_ok()
    }

    /// Pull an image, retrying with linear back-off.
    pub async fn pull(&self, image: &str) -> Result<()> {
        let cmd = self.command().args(["pull", image]);
        let mut attempt = 1;
        loop {
            match self.run_cmd(&cmd).await {
                Ok(_) => {
                    tracing::info!(image, attempt, "Image pulled");
                    return Ok(());
                }
                Err(e) if attempt < PULL_ATTEMPTS => {
                    tracing::warn!(image, attempt, error = %e, "Image pull failed, retrying");
                    tokio::time::sleep(PULL_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Make sure an image is available locally, pulling only when absent.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_present(image).await {
            tracing::debug!(image, "Image already present");
            return Ok(());
        }
        tracing::info!(image, "Pulling image");
        self.pull(image).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn engine(runner: &Arc<ScriptedRunner>) -> Engine {
        Engine::docker(runner.clone())
    }

    #[tokio::test]
    async fn test_remove_empty_is_noop() {
        let runner = Arc::new(ScriptedRunner::new());
        engine(&runner).remove(&[]).await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_forces_and_drops_volumes() {
        let runner = Arc::new(ScriptedRunner::new());
        engine(&runner)
            .remove(&["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(runner.calls()[0].args, vec!["rm", "-f", "-v", "a", "b"]);
    }

    #[tokio::test]
    async fn test_exec_with_stdin_uses_interactive_flag() {
        let runner = Arc::new(ScriptedRunner::new());
        engine(&runner)
            .exec("node", &["cat"], Some(b"hi".to_vec()))
            .await
            .unwrap();
        let call = &runner.calls()[0];
        assert_eq!(call.args, vec!["exec", "-i", "node", "cat"]);
        assert_eq!(call.stdin.as_deref(), Some(&b"hi"[..]));
    }

    #[tokio::test]
    async fn test_inspect_line_rejects_multiple_lines() {
        let runner = Arc::new(ScriptedRunner::new().on(["docker", "inspect"], "a\nb\n"));
        let err = engine(&runner).inspect_line("n", "{{.Name}}").await.unwrap_err();
        assert!(err.is_unexpected_output());
    }

    #[tokio::test]
    async fn test_userns_remap_detection() {
        let runner = Arc::new(ScriptedRunner::new().on(
            ["docker", "info"],
            r#"["name=seccomp,profile=default","name=userns"]"#,
        ));
        assert!(engine(&runner).userns_remap().await.unwrap());

        let runner = Arc::new(ScriptedRunner::new().on(["docker", "info"], "not json"));
        assert!(engine(&runner).userns_remap().await.unwrap_err().is_unexpected_output());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_retries_then_fails() {
        let runner = Arc::new(ScriptedRunner::new().fail_on(["docker", "pull"], "timeout"));
        let err = engine(&runner).pull("img").await.unwrap_err();
        assert!(err.is_invocation());
        assert_eq!(runner.calls_matching(["docker", "pull"]).len(), PULL_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_ensure_image_skips_pull_when_present() {
        let runner = Arc::new(ScriptedRunner::new());
        engine(&runner).ensure_image("img").await.unwrap();
        assert!(runner.calls_matching(["docker", "pull"]).is_empty());
    }
}
