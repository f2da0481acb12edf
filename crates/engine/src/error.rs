//! Engine-level error types: the taxonomy shared by the validator, compiler,
//! and scheduler.

use thiserror::Error;

use crate::validate::ValidationReport;

/// Errors produced by the workflow engine across compile-time and
/// runtime phases.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Compile-time errors ------
    /// IR failed structural, reference, input, template, or action-closure
    /// validation. Carries every diagnostic collected across all phases.
    #[error("workflow IR failed validation ({} error(s))", .0.error_count())]
    ValidationError(ValidationReport),

    /// `nodes[*].type` does not resolve in the registry.
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    /// Two edges map the same `(source, action)` pair to different targets.
    #[error("ambiguous routing: node '{node_id}' action '{action}' maps to multiple targets")]
    AmbiguousRouting { node_id: String, action: String },

    /// Neither an explicit `start_node` nor a first node could be resolved.
    #[error("workflow has no start node")]
    MissingStartNode,

    /// A compile-time self-referential dependency (e.g. a sub-workflow node
    /// embedding itself) was detected.
    #[error("cyclic compilation dependency involving node '{0}'")]
    CyclicCompilationDependency(String),

    // ------ Runtime errors ------
    /// A caller-supplied input value does not coerce to its declared
    /// `InputType`, or a required input has neither a caller value nor a
    /// declared default at run time.
    #[error("input '{name}' is invalid: {message}")]
    InvalidInput { name: String, message: String },

    /// A template path could not be resolved at runtime (not statically
    /// provable at compile time).
    #[error("unresolved template path '{0}'")]
    UnresolvedTemplate(String),

    /// A node's `exec` failed after exhausting retries and fallback, and
    /// no `"error"` successor is declared.
    #[error("node '{node_id}' failed: {message}")]
    NodeFailure { node_id: String, message: String },

    /// A node's `exec` exceeded its declared `timeout_seconds`.
    #[error("node '{node_id}' timed out after {elapsed_ms}ms")]
    NodeTimeout { node_id: String, elapsed_ms: u128 },

    /// A node attempted to write outside its own namespace.
    #[error("scope violation: node '{node_id}' attempted to write key '{key}' into namespace '{target_namespace}'")]
    ScopeViolation {
        node_id: String,
        target_namespace: String,
        key: String,
    },

    /// A node exceeded its declared `max_visits`.
    #[error("node '{node_id}' exceeded its loop budget of {max_visits} visits")]
    LoopBudgetExceeded { node_id: String, max_visits: u32 },

    /// An external cancellation signal was observed.
    #[error("run was cancelled")]
    CancellationRequested,

    /// An engine invariant was broken; indicates a defect in the engine
    /// itself rather than the workflow or a node.
    #[error("internal engine error: {0}")]
    InternalError(String),
}

impl EngineError {
    /// Whether this error should halt the run outright, vs. being
    /// recoverable via a node's declared `"error"` action.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            EngineError::ScopeViolation { .. }
                | EngineError::LoopBudgetExceeded { .. }
                | EngineError::InternalError(_)
                | EngineError::InvalidInput { .. }
        )
    }
}
