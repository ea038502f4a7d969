//! Error types for kinder-core.

use std::fmt;
use thiserror::Error;

/// Result type alias for kinder-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during cluster operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from kinder-runtime
    #[error("runtime error: {0}")]
    Runtime(#[from] kinder_runtime::RuntimeError),

    /// The cluster specification is not acceptable
    #[error("invalid cluster spec: {0}")]
    Validation(String),

    /// A node role outside the known set
    #[error("unknown node role: {0:?}")]
    UnknownRole(String),

    /// Several concurrent operations failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// A named pipeline step failed
    #[error("step {step:?} failed: {source}")]
    Step {
        /// Label of the failed step
        step: String,
        /// Underlying failure
        source: Box<CoreError>,
    },

    /// An operation failed; `context` names what was being attempted
    #[error("{context}: {source}")]
    Context {
        /// Operation name
        context: String,
        /// Underlying failure
        source: Box<CoreError>,
    },

    /// The credential bundle could not be rewritten
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// A cluster with this name already has nodes
    #[error("cluster {0:?} already exists")]
    ClusterExists(String),

    /// A required node is missing from the cluster
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned unit of work panicked or was aborted
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CoreError {
    /// Wrap this error with the name of the operation that produced it.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost runtime error, if this failure came from the runtime.
    pub fn runtime(&self) -> Option<&kinder_runtime::RuntimeError> {
        match self {
            Self::Runtime(e) => Some(e),
            Self::Step { source, .. } | Self::Context { source, .. } => source.runtime(),
            _ => None,
        }
    }
}

/// Adds operation names to fallible results.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with `context`.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Like [`ResultExt::context`], building the message lazily.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<CoreError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

/// Ordered, non-empty set of failures from concurrent operations.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<CoreError>,
}

impl AggregateError {
    /// Build an aggregate, or `None` when there is nothing to report.
    pub fn new(errors: Vec<CoreError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    /// Every cause, in submission order.
    pub fn errors(&self) -> &[CoreError] {
        &self.errors
    }

    /// Number of causes.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always false; an aggregate holds at least one cause.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Take the causes out.
    pub fn into_errors(self) -> Vec<CoreError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            return write!(f, "{only}");
        }
        write!(f, "{} errors occurred:", self.errors.len())?;
        for e in &self.errors {
            write!(f, "\n\t* {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
