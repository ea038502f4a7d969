//! Error types for kinder-runtime.

use thiserror::Error;

/// Result type alias for kinder-runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime (or a command inside a node) exited non-zero.
    #[error("command `{command}` failed with exit code {}: {output}", exit_label(.code))]
    Invocation {
        /// Full command line that was attempted.
        command: String,
        /// Exit code, `None` when the process was killed by a signal.
        code: Option<i32>,
        /// Combined stdout and stderr, kept for diagnostics.
        output: String,
    },

    /// The command succeeded but its output did not have the expected shape.
    #[error("unexpected output from `{command}`: {detail}")]
    UnexpectedOutput {
        /// Full command line that produced the output.
        command: String,
        /// What was expected versus what was seen.
        detail: String,
    },

    /// The runtime binary could not be started at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Full command line that was attempted.
        command: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
}

impl RuntimeError {
    /// Build an [`RuntimeError::UnexpectedOutput`] for the given command.
    pub fn unexpected(command: impl ToString, detail: impl Into<String>) -> Self {
        Self::UnexpectedOutput {
            command: command.to_string(),
            detail: detail.into(),
        }
    }

    /// True for non-zero exits, false for shape and spawn failures.
    pub fn is_invocation(&self) -> bool {
        matches!(self, Self::Invocation { .. })
    }

    /// True when the output could not be parsed into the expected shape.
    pub fn is_unexpected_output(&self) -> bool {
        matches!(self, Self::UnexpectedOutput { .. })
    }
}
