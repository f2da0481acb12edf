//! The `Node` trait — the prep/exec/post contract every node must fulfil.
//!
//! `StoreView` is defined here rather than in `engine` so that node
//! implementations (built-in or third-party) can depend on `nodes` alone
//! without pulling in the whole engine crate, and so `engine` can depend on
//! `nodes` without a cycle. `engine::store::StoreView` is the concrete type
//! that implements it at runtime.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::NodeError;

/// Read/write access to a single node's namespace in the shared store,
/// scoped so that writes outside the owner's namespace are rejected.
///
/// Reads may traverse into any namespace via a dotted/indexed path
/// (`other_node.field[0]`); writes, deletes, and `keys()` are confined to
/// the view's own namespace. Views are thin handles backed by the store's
/// own internal lock, so mutation takes `&self` rather than `&mut self` —
/// the same view can be shared between the template-aware wrapper (which
/// materializes params before `prep`) and the node's `prep`/`post` calls.
pub trait StoreView: Send + Sync {
    /// Resolve a dotted/indexed path against the whole store (any namespace).
    fn read(&self, path: &str) -> Result<Value, NodeError>;

    /// Write `key` into the view's own namespace.
    fn write(&self, key: &str, value: Value) -> Result<(), NodeError>;

    /// Whether `key` exists in the view's own namespace.
    fn has(&self, key: &str) -> bool;

    /// Remove `key` from the view's own namespace, returning its prior value.
    fn delete(&self, key: &str) -> Option<Value>;

    /// All keys currently set in the view's own namespace.
    fn keys(&self) -> Vec<String>;

    /// Dict-like read of a single key in the view's own namespace, bypassing
    /// full path resolution. Used by nodes to read back the resolved
    /// parameters the template-aware wrapper wrote before `prep` ran.
    fn own(&self, key: &str) -> Option<Value>;

    /// The namespace this view is scoped to write into.
    fn owner(&self) -> &str;
}

/// Shared context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: uuid::Uuid,
    /// ID of the current execution run.
    pub execution_id: uuid::Uuid,
    /// Initial input supplied when the execution was triggered.
    pub input: Value,
    /// Decrypted secrets scoped to this workflow.
    pub secrets: std::collections::HashMap<String, String>,
    /// Current retry attempt for the in-flight `exec` call (0-based).
    pub attempt: u32,
    /// Whether the run was started with `verbose` instrumentation.
    pub verbose: bool,
}

/// A single declared configuration parameter of a node type.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<Value>,
}

/// The coercion target type for a node parameter or workflow input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// Accept the value as-is, with no coercion.
    Any,
}

/// A node type's declared interface: what it reads, what it guarantees to
/// write, its configuration schema, and the routing actions its `post` may
/// return.
#[derive(Debug, Clone)]
pub struct NodeInterface {
    /// Logical input names this node expects to be resolvable in its view.
    pub reads: Vec<String>,
    /// Output keys this node guarantees to write to its own namespace.
    pub writes: Vec<String>,
    /// Configuration schema for `params`.
    pub params: Vec<ParamSpec>,
    /// Action strings this node's `post` may return. Always includes
    /// `"default"` even if not listed explicitly.
    pub actions: Vec<String>,
    /// Maximum number of `exec` retries on `Retryable`/`Timeout` failure.
    pub max_retries: u32,
    /// Delay between `exec` retries.
    pub retry_delay: Duration,
    /// Maximum number of times this node may be visited in one run before
    /// `LoopBudgetExceeded` is raised.
    pub max_visits: u32,
    /// Optional wall-clock bound on a single `exec` call.
    pub timeout: Option<Duration>,
}

impl Default for NodeInterface {
    fn default() -> Self {
        Self {
            reads: Vec::new(),
            writes: Vec::new(),
            params: Vec::new(),
            actions: vec!["default".to_string()],
            max_retries: 1,
            retry_delay: Duration::from_secs(0),
            max_visits: 1,
            timeout: None,
        }
    }
}

/// The core node trait: a unit of work with a three-phase lifecycle.
///
/// - `prep` reads from the view and validates/prepares input for `exec`.
/// - `exec` performs the actual work; it must not touch the store.
/// - `post` writes results to the view's own namespace and returns the
///   routing action.
#[async_trait]
pub trait Node: Send + Sync {
    /// This node type's declared interface (reads/writes/params/actions).
    fn interface(&self) -> NodeInterface;

    /// A human-readable name for logging/tracing.
    fn name(&self) -> &str;

    /// Read and validate input from the store view. `cancellation` carries
    /// the run's cancellation signal down to wrappers (namely `BatchNode`)
    /// that loop internally and need to observe it between iterations;
    /// most node implementations ignore it and rely on the executor's own
    /// per-node cancellation check instead.
    async fn prep(&self, view: &dyn StoreView, cancellation: CancellationToken) -> Result<Value, NodeError>;

    /// Perform the node's work. Must be safe to retry.
    async fn exec(&self, prep_result: Value, ctx: &ExecutionContext) -> Result<Value, NodeError>;

    /// Write results to the view's own namespace; return the routing action.
    async fn post(
        &self,
        view: &dyn StoreView,
        prep_result: Value,
        exec_result: Value,
    ) -> Result<String, NodeError>;

    /// Recover from a terminal `exec` failure. Default: propagate the error.
    async fn exec_fallback(
        &self,
        _prep_result: Value,
        error: NodeError,
    ) -> Result<Value, NodeError> {
        Err(error)
    }
}

#[async_trait]
impl Node for Box<dyn Node> {
    fn interface(&self) -> NodeInterface {
        (**self).interface()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn prep(&self, view: &dyn StoreView, cancellation: CancellationToken) -> Result<Value, NodeError> {
        (**self).prep(view, cancellation).await
    }

    async fn exec(&self, prep_result: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        (**self).exec(prep_result, ctx).await
    }

    async fn post(&self, view: &dyn StoreView, prep_result: Value, exec_result: Value) -> Result<String, NodeError> {
        (**self).post(view, prep_result, exec_result).await
    }

    async fn exec_fallback(&self, prep_result: Value, error: NodeError) -> Result<Value, NodeError> {
        (**self).exec_fallback(prep_result, error).await
    }
}
