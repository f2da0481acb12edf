//! The wrapper chain: every compiled node is wrapped, outermost first, as
//!
//! ```text
//! InstrumentedNode<BatchNode<NamespacedNode<TemplatedNode<Inner>>>>
//! ```
//!
//! Each layer implements `nodes::Node` itself, so the executor drives the
//! whole stack through the same `prep`/`exec`/`post` contract it would use
//! for an unwrapped node.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nodes::{ExecutionContext, Node, NodeError, NodeInterface, StoreView};

use crate::coerce::coerce_param;
use crate::template::resolve_value_via_view;

/// Batch directive read from a node's `params.batch` key:
/// `{ "source": "${node.items}", "key": "item", "concurrency": 1, "continue_on_error": false }`.
#[derive(Debug, Clone)]
struct BatchDirective {
    source: String,
    key: String,
    continue_on_error: bool,
    /// Parsed for validation/diagnostics only — this engine runs batch
    /// items sequentially, so a declared `concurrency` greater than one has
    /// no execution effect (see `validate::phase_batch_directives`).
    #[allow(dead_code)]
    concurrency: Option<u64>,
}

impl BatchDirective {
    fn from_params(params: &serde_json::Map<String, Value>) -> Option<Self> {
        let batch = params.get("batch")?.as_object()?;
        let source = batch.get("source")?.as_str()?.to_string();
        let key = batch.get("key")?.as_str()?.to_string();
        let continue_on_error = batch.get("continue_on_error").and_then(Value::as_bool).unwrap_or(false);
        let concurrency = batch.get("concurrency").and_then(Value::as_u64);
        Some(Self { source, key, continue_on_error, concurrency })
    }
}

/// Outermost layer: structured logging and timing around each phase. Does
/// not alter `prep`/`exec`/`post` results.
pub struct InstrumentedNode<N> {
    inner: N,
}

impl<N> InstrumentedNode<N> {
    pub fn new(inner: N) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<N: Node> Node for InstrumentedNode<N> {
    fn interface(&self) -> NodeInterface {
        self.inner.interface()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn prep(&self, view: &dyn StoreView, cancellation: CancellationToken) -> Result<Value, NodeError> {
        debug!(node = self.inner.name(), phase = "prep", "node_started");
        let started = Instant::now();
        let result = self.inner.prep(view, cancellation).await;
        match &result {
            Ok(_) => debug!(node = self.inner.name(), phase = "prep", elapsed_ms = started.elapsed().as_millis() as u64, "node_phase_complete"),
            Err(e) => warn!(node = self.inner.name(), phase = "prep", error = %e, "node_failed"),
        }
        result
    }

    async fn exec(&self, prep_result: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        if ctx.attempt > 0 {
            info!(node = self.inner.name(), attempt = ctx.attempt, "node_retried");
        }
        let started = Instant::now();
        let result = self.inner.exec(prep_result, ctx).await;
        match &result {
            Ok(_) => info!(
                node = self.inner.name(),
                phase = "exec",
                elapsed_ms = started.elapsed().as_millis() as u64,
                "node_succeeded"
            ),
            Err(e) => warn!(node = self.inner.name(), phase = "exec", attempt = ctx.attempt, error = %e, "node_failed"),
        }
        result
    }

    async fn post(&self, view: &dyn StoreView, prep_result: Value, exec_result: Value) -> Result<String, NodeError> {
        let result = self.inner.post(view, prep_result, exec_result).await;
        match &result {
            Ok(action) => debug!(node = self.inner.name(), phase = "post", action = %action, "node_phase_complete"),
            Err(e) => error!(node = self.inner.name(), phase = "post", error = %e, "node_failed"),
        }
        result
    }

    async fn exec_fallback(&self, prep_result: Value, error: NodeError) -> Result<Value, NodeError> {
        warn!(node = self.inner.name(), error = %error, "node exec_fallback invoked");
        self.inner.exec_fallback(prep_result, error).await
    }
}

/// Iterates a declared `batch` directive over the inner node, one item at a
/// time (this engine supports sequential batch execution only; declaring a
/// `concurrency` greater than one does not change behaviour). Aggregates
/// each item's exec result into an array and writes it to the node's own
/// namespace under `batch_results`.
///
/// Because per-item retries happen inside this wrapper, all the real work
/// happens in `prep`; `exec` is an identity pass-through so the engine's own
/// per-node retry loop has nothing left to retry when batching is active.
pub struct BatchNode<N> {
    inner: N,
    directive: Option<BatchDirective>,
}

impl<N: Node> BatchNode<N> {
    pub fn new(inner: N, params: &serde_json::Map<String, Value>) -> Self {
        let directive = BatchDirective::from_params(params);
        Self { inner, directive }
    }
}

#[async_trait]
impl<N: Node> Node for BatchNode<N> {
    fn interface(&self) -> NodeInterface {
        self.inner.interface()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn prep(&self, view: &dyn StoreView, cancellation: CancellationToken) -> Result<Value, NodeError> {
        let Some(directive) = &self.directive else {
            return self.inner.prep(view, cancellation).await;
        };

        let items = view.read(&directive.source)?;
        let items = items
            .as_array()
            .ok_or_else(|| NodeError::Fatal(format!("batch source '{}' is not an array", directive.source)))?
            .clone();

        let interface = self.inner.interface();
        let mut results = Vec::with_capacity(items.len());
        let mut any_error = false;

        for item in items {
            if cancellation.is_cancelled() {
                // `post` never runs on cancellation, but whatever items
                // completed before the signal are still worth surfacing —
                // write them under the same key a successful batch would.
                view.write("batch_results", serde_json::json!(results))?;
                return Err(NodeError::Cancelled);
            }

            view.write(&directive.key, item)?;
            let prep_result = match self.inner.prep(view, cancellation.clone()).await {
                Ok(v) => v,
                Err(e) if directive.continue_on_error => {
                    any_error = true;
                    results.push(serde_json::json!({ "error": e.to_string() }));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut exec_result = self.inner.exec(prep_result.clone(), &dummy_ctx()).await;
            let mut attempts = 0;
            while let Err(e) = &exec_result {
                if !e.is_retryable() || attempts >= interface.max_retries {
                    break;
                }
                attempts += 1;
                tokio::time::sleep(interface.retry_delay).await;
                exec_result = self.inner.exec(prep_result.clone(), &dummy_ctx()).await;
            }

            let exec_result = match exec_result {
                Ok(v) => v,
                Err(e) => match self.inner.exec_fallback(prep_result.clone(), e).await {
                    Ok(v) => v,
                    Err(e) if directive.continue_on_error => {
                        any_error = true;
                        results.push(serde_json::json!({ "error": e.to_string() }));
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            results.push(exec_result);
        }

        Ok(serde_json::json!({ "batch_results": results, "any_error": any_error }))
    }

    async fn exec(&self, prep_result: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        if self.directive.is_none() {
            return self.inner.exec(prep_result, ctx).await;
        }
        Ok(prep_result)
    }

    async fn post(&self, view: &dyn StoreView, prep_result: Value, exec_result: Value) -> Result<String, NodeError> {
        if self.directive.is_none() {
            return self.inner.post(view, prep_result, exec_result).await;
        }

        let results = exec_result.get("batch_results").cloned().unwrap_or(Value::Array(vec![]));
        let any_error = exec_result.get("any_error").and_then(Value::as_bool).unwrap_or(false);
        view.write("batch_results", results)?;
        Ok(if any_error { "error".to_string() } else { "default".to_string() })
    }
}

fn dummy_ctx() -> ExecutionContext {
    ExecutionContext {
        workflow_id: uuid::Uuid::nil(),
        execution_id: uuid::Uuid::nil(),
        input: Value::Null,
        secrets: Default::default(),
        attempt: 0,
        verbose: false,
    }
}

/// Asserts write-scope discipline: the view passed down must be owned by
/// this node's id. The `StoreView` the executor constructs already enforces
/// this at the store layer; this wrapper exists so the invariant is visible
/// at the type level and to give a clearer diagnostic if it is ever violated
/// by a future caller.
pub struct NamespacedNode<N> {
    inner: N,
    node_id: String,
}

impl<N: Node> NamespacedNode<N> {
    pub fn new(inner: N, node_id: impl Into<String>) -> Self {
        Self { inner, node_id: node_id.into() }
    }
}

#[async_trait]
impl<N: Node> Node for NamespacedNode<N> {
    fn interface(&self) -> NodeInterface {
        self.inner.interface()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn prep(&self, view: &dyn StoreView, cancellation: CancellationToken) -> Result<Value, NodeError> {
        debug_assert_eq!(view.owner(), self.node_id, "view owner mismatch for node '{}'", self.node_id);
        self.inner.prep(view, cancellation).await
    }

    async fn exec(&self, prep_result: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        self.inner.exec(prep_result, ctx).await
    }

    async fn post(&self, view: &dyn StoreView, prep_result: Value, exec_result: Value) -> Result<String, NodeError> {
        debug_assert_eq!(view.owner(), self.node_id, "view owner mismatch for node '{}'", self.node_id);
        self.inner.post(view, prep_result, exec_result).await
    }

    async fn exec_fallback(&self, prep_result: Value, error: NodeError) -> Result<Value, NodeError> {
        self.inner.exec_fallback(prep_result, error).await
    }
}

/// Innermost wrapper: materializes the node's declared `params` by resolving
/// every `${...}` expression against the current store state immediately
/// before `prep`, coercing each to its declared `ParamType`, and writing the
/// resolved values into the node's own namespace so `prep` can read them
/// back via `view.own(name)`.
pub struct TemplatedNode<N> {
    inner: N,
    params: serde_json::Map<String, Value>,
}

impl<N: Node> TemplatedNode<N> {
    pub fn new(inner: N, params: serde_json::Map<String, Value>) -> Self {
        Self { inner, params }
    }
}

#[async_trait]
impl<N: Node> Node for TemplatedNode<N> {
    fn interface(&self) -> NodeInterface {
        self.inner.interface()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn prep(&self, view: &dyn StoreView, cancellation: CancellationToken) -> Result<Value, NodeError> {
        let interface = self.inner.interface();
        let resolved = resolve_value_via_view(view, &Value::Object(self.params.clone()))?;
        let resolved = resolved
            .as_object()
            .cloned()
            .ok_or_else(|| NodeError::Fatal("resolved params did not remain an object".to_string()))?;

        for spec in &interface.params {
            let raw = resolved.get(&spec.name).cloned().or_else(|| spec.default.clone());
            let raw = match raw {
                Some(v) => v,
                None if spec.required => {
                    return Err(NodeError::Fatal(format!("missing required param '{}'", spec.name)));
                }
                None => continue,
            };
            let coerced = coerce_param(&raw, spec.ty)
                .map_err(|e| NodeError::Fatal(format!("param '{}': {e}", spec.name)))?;
            view.write(&spec.name, coerced)?;
        }

        // Params with no declared spec (untyped/opaque) are still passed
        // through resolved, unwritten by the loop above.
        for (key, value) in &resolved {
            if !interface.params.iter().any(|p| &p.name == key) {
                view.write(key, value.clone())?;
            }
        }

        self.inner.prep(view, cancellation).await
    }

    async fn exec(&self, prep_result: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        self.inner.exec(prep_result, ctx).await
    }

    async fn post(&self, view: &dyn StoreView, prep_result: Value, exec_result: Value) -> Result<String, NodeError> {
        self.inner.post(view, prep_result, exec_result).await
    }

    async fn exec_fallback(&self, prep_result: Value, error: NodeError) -> Result<Value, NodeError> {
        self.inner.exec_fallback(prep_result, error).await
    }
}

/// Compose the full chain around a freshly-built node instance, in the
/// fixed order: instrumentation (outermost), batch, namespacing, templating
/// (innermost, next to the concrete node).
pub fn wrap(inner: Box<dyn Node>, node_id: &str, params: serde_json::Map<String, Value>) -> Box<dyn Node> {
    let templated = TemplatedNode::new(inner, params.clone());
    let namespaced = NamespacedNode::new(templated, node_id.to_string());
    let batched = BatchNode::new(namespaced, &params);
    let instrumented = InstrumentedNode::new(batched);
    Box::new(instrumented)
}

#[allow(dead_code)]
fn _assert_default_retry_delay_is_finite(d: Duration) -> Duration {
    d
}
