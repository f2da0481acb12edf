//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `prep`, `exec`, or `post` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` — the `exec` phase is retried with back-off, up to the
///   node's declared `max_retries`.
/// - `Fatal`     — no retry is attempted; the node fails immediately.
/// - `Timeout`   — `exec` exceeded the node's declared `timeout_seconds`;
///   treated like `Retryable` for retry purposes.
/// - `ScopeViolation` — the node attempted to write outside its own
///   namespace. Never retried.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// Transient failure; the engine should retry the `exec` phase.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// `exec` exceeded its declared timeout.
    #[error("node execution timed out: {0}")]
    Timeout(String),

    /// The node attempted to write to a namespace it does not own.
    #[error("scope violation: attempted to write key '{key}' outside owner namespace '{owner}'")]
    ScopeViolation { owner: String, key: String },

    /// A template or input path could not be resolved against the view.
    #[error("unresolved path: {0}")]
    UnresolvedPath(String),

    /// The run's cancellation signal fired while this node (or a wrapper
    /// looping over it, e.g. `BatchNode`) was still working. Never retried;
    /// the executor treats it as a direct run-level cancellation rather than
    /// routing it through a node's `"error"` action.
    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    /// Whether this error should trigger a retry of the `exec` phase.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Retryable(_) | NodeError::Timeout(_))
    }
}

impl From<String> for NodeError {
    fn from(s: String) -> Self {
        NodeError::Fatal(s)
    }
}

impl From<&str> for NodeError {
    fn from(s: &str) -> Self {
        NodeError::Fatal(s.to_string())
    }
}
