//! External command invocation.
//!
//! Every interaction with the container runtime, and every command executed
//! inside a node, goes through a [`Runner`]. The host implementation blocks the
//! calling task until the child process exits; there is no streaming.

use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A single external command: program, arguments and optional stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    /// Program to execute (looked up on `PATH`).
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Bytes written to the child's stdin, if any.
    pub stdin: Option<Vec<u8>>,
}

impl Cmd {
    /// Create a command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed the given bytes to the child's stdin.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in self.argv() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if part.is_empty() || part.contains(char::is_whitespace) {
                write!(f, "{:?}", part)?;
            } else {
                f.write_str(part)?;
            }
        }
        Ok(())
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
}

impl Output {
    /// Build an output holding only stdout.
    pub fn from_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Stdout as (lossy) UTF-8.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout split into lines. A trailing newline does not produce an empty line.
    pub fn lines(&self) -> Vec<String> {
        split_lines(&self.stdout)
    }

    /// Stdout lines followed by stderr lines.
    pub fn combined_lines(&self) -> Vec<String> {
        let mut lines = split_lines(&self.stdout);
        lines.extend(split_lines(&self.stderr));
        lines
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect()
}

/// Executes commands on behalf of the runtime layer.
///
/// Implementations must map a non-zero exit status to
/// [`RuntimeError::Invocation`].
#[async_trait]
pub trait Runner: Send + Sync + fmt::Debug {
    /// Run the command to completion and capture its output.
    async fn run(&self, cmd: &Cmd) -> Result<Output>;
}

/// [`Runner`] that spawns real processes on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

#[async_trait]
impl Runner for HostRunner {
    async fn run(&self, cmd: &Cmd) -> Result<Output> {
        let start = std::time::Instant::now();
        tracing::debug!(command = %cmd, "Running command");

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        // A child may exit without draining stdin; its status and stderr still
        // decide the result.
        let mut write_error = None;
        if let (Some(input), Some(mut stdin)) = (cmd.stdin.as_ref(), child.stdin.take()) {
            if let Err(e) = stdin.write_all(input).await {
                tracing::debug!(command = %cmd, error = %e, "Writing stdin failed");
                write_error = Some(e);
            }
            // Dropping stdin closes the pipe so the child sees EOF.
            drop(stdin);
        }

        let out = child.wait_with_output().await?;
        let output = Output {
            stdout: out.stdout,
            stderr: out.stderr,
        };
        tracing::trace!(
            command = %cmd,
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "Command output"
        );

        if !out.status.success() {
            tracing::debug!(
                command = %cmd,
                code = ?out.status.code(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Command failed"
            );
            return Err(RuntimeError::Invocation {
                command: cmd.to_string(),
                code: out.status.code(),
                output: output.combined_lines().join("\n"),
            });
        }

        if let Some(e) = write_error {
            return Err(e.into());
        }

        tracing::debug!(
            command = %cmd,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command completed"
        );
        Ok(output)
    }
}

/// Require exactly one line of output, as most templated inspections produce.
pub fn single_line(cmd: &Cmd, output: &Output) -> Result<String> {
    let mut lines = output.lines();
    if lines.len() != 1 {
        return Err(RuntimeError::unexpected(
            cmd,
            format!("expected 1 line of output, got {}", lines.len()),
        ));
    }
    Ok(lines.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_display_quotes_whitespace() {
        let cmd = Cmd::new("docker")
            .args(["inspect", "--format"])
            .arg("{{ .Name }} x")
            .arg("node");
        assert_eq!(cmd.to_string(), "docker inspect --format \"{{ .Name }} x\" node");
    }

    #[test]
    fn test_output_lines_trims_trailing_newline() {
        let out = Output::from_stdout("a\nb\n");
        assert_eq!(out.lines(), vec!["a", "b"]);
        assert!(Output::from_stdout("").lines().is_empty());
        assert!(Output::from_stdout("\n").lines().is_empty());
    }

    #[test]
    fn test_output_combined_lines() {
        let out = Output {
            stdout: b"init\n".to_vec(),
            stderr: b"warn: swap\n".to_vec(),
        };
        assert_eq!(out.combined_lines(), vec!["init", "warn: swap"]);
    }

    #[test]
    fn test_single_line_rejects_wrong_count() {
        let cmd = Cmd::new("docker").arg("inspect");
        let err = single_line(&cmd, &Output::from_stdout("a\nb\n")).unwrap_err();
        assert!(err.is_unexpected_output());
        assert_eq!(
            single_line(&cmd, &Output::from_stdout("only\n")).unwrap(),
            "only"
        );
    }

    #[tokio::test]
    async fn test_host_runner_success_and_stdin() {
        let out = HostRunner
            .run(&Cmd::new("sh").args(["-c", "cat"]).stdin("piped"))
            .await
            .expect("sh should run");
        assert_eq!(out.stdout_str(), "piped");
    }

    #[tokio::test]
    async fn test_host_runner_nonzero_is_invocation_error() {
        let err = HostRunner
            .run(&Cmd::new("sh").args(["-c", "echo boom >&2; exit 3"]))
            .await
            .unwrap_err();
        match err {
            RuntimeError::Invocation { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_host_runner_unread_stdin_keeps_exit_status() {
        let input = vec![b'x'; 4 * 1024 * 1024];
        let err = HostRunner
            .run(&Cmd::new("sh").args(["-c", "echo refused >&2; exit 3"]).stdin(input))
            .await
            .unwrap_err();
        match err {
            RuntimeError::Invocation { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_host_runner_missing_binary_is_spawn_error() {
        let err = HostRunner
            .run(&Cmd::new("kinder-definitely-not-installed"))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }
}
