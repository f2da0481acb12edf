//! The scheduler: a single-threaded cooperative executor that walks the
//! compiled graph from its start node, driving each visited node through
//! `prep -> exec (with retry) -> post` and following the action it returns.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use nodes::{ExecutionContext, Node, NodeError};

use crate::coerce;
use crate::compile::CompiledGraph;
use crate::error::EngineError;
use crate::persistence::RunPersistence;
use crate::store::SharedStore;
use crate::validate::Diagnostic;

/// Which lifecycle phase a run failed in, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prep,
    Exec,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

/// Executor-wide tuning knobs, independent of any one workflow.
#[derive(Clone)]
pub struct ExecutorConfig {
    /// Whether to emit a full store snapshot in the run result (costly for
    /// large stores; useful for debugging).
    pub capture_snapshot: bool,
    /// Optional observer notified of node- and run-level lifecycle events.
    /// `None` in tests and one-shot CLI validation runs; set by the queue
    /// worker so runs get persisted to `db` without the engine itself
    /// depending on Postgres.
    pub persistence: Option<Arc<dyn RunPersistence>>,
    /// Wall-clock bound on the whole run, checked between node visits.
    /// `None` (the default) means no run-level bound; individual nodes may
    /// still declare their own `NodeInterface::timeout` on `exec`.
    pub run_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { capture_snapshot: false, persistence: None, run_timeout: None }
    }
}

impl std::fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("capture_snapshot", &self.capture_snapshot)
            .field("persistence", &self.persistence.is_some())
            .field("run_timeout", &self.run_timeout)
            .finish()
    }
}

/// Per-run inputs.
pub struct RunOptions {
    pub workflow_id: Uuid,
    /// Identifies this run across process boundaries. Defaults to a fresh
    /// id; callers that already created an execution record up-front (the
    /// API handler, the queue worker) should overwrite this with that
    /// record's id so `RunPersistence` calls line up with it.
    pub execution_id: Uuid,
    pub inputs: serde_json::Map<String, Value>,
    pub secrets: HashMap<String, String>,
    pub verbose: bool,
    pub cancellation: CancellationToken,
    /// Diagnostics carried over from compile-time validation (warnings that
    /// didn't block compilation), echoed back in the run result.
    pub compile_diagnostics: Vec<Diagnostic>,
}

impl RunOptions {
    pub fn new(workflow_id: Uuid, inputs: serde_json::Map<String, Value>) -> Self {
        Self {
            workflow_id,
            execution_id: Uuid::new_v4(),
            inputs,
            secrets: HashMap::new(),
            verbose: false,
            cancellation: CancellationToken::new(),
            compile_diagnostics: Vec::new(),
        }
    }
}

/// The run result envelope returned to callers (API, CLI, queue worker).
#[derive(Debug, serde::Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub run_id: Uuid,
    pub outputs: serde_json::Map<String, Value>,
    pub diagnostics: Vec<Diagnostic>,
    pub failed_node: Option<String>,
    pub phase: Option<Phase>,
    pub error: Option<String>,
    pub partial_outputs: serde_json::Map<String, Value>,
    pub store_snapshot: Option<Value>,
}

pub struct Executor<'a> {
    graph: &'a CompiledGraph,
    config: ExecutorConfig,
}

impl<'a> Executor<'a> {
    pub fn new(graph: &'a CompiledGraph, config: ExecutorConfig) -> Self {
        Self { graph, config }
    }

    /// Run the compiled graph to completion, cancellation, or halting
    /// failure.
    pub async fn run(&self, options: RunOptions) -> RunResult {
        let inputs = match resolve_inputs(&self.graph.inputs, &options.inputs) {
            Ok(inputs) => inputs,
            Err(e) => {
                let message = e.to_string();
                return RunResult {
                    status: RunStatus::Failed,
                    run_id: options.execution_id,
                    outputs: serde_json::Map::new(),
                    diagnostics: options.compile_diagnostics.clone(),
                    failed_node: None,
                    phase: None,
                    error: Some(message),
                    partial_outputs: serde_json::Map::new(),
                    store_snapshot: None,
                };
            }
        };

        let store = std::sync::Arc::new(SharedStore::new(
            inputs,
            self.graph.nodes.keys().cloned(),
            options.verbose,
            options.execution_id,
        ));
        let execution_id = store.run_id();

        if let Some(p) = &self.config.persistence {
            p.on_run_started(options.workflow_id, execution_id).await;
        }

        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(self.graph.start_node.clone());
        let mut visit_counts: HashMap<String, u32> = HashMap::new();
        let run_started = Instant::now();

        while let Some(node_id) = queue.pop_front() {
            if options.cancellation.is_cancelled() {
                return self.cancelled(&store, &options).await;
            }
            if let Some(limit) = self.config.run_timeout {
                if run_started.elapsed() >= limit {
                    return self
                        .failed(
                            &store,
                            &options,
                            Some(node_id.clone()),
                            None,
                            EngineError::NodeTimeout { node_id: node_id.clone(), elapsed_ms: run_started.elapsed().as_millis() },
                        )
                        .await;
                }
            }

            let compiled = match self.graph.get(&node_id) {
                Some(c) => c,
                None => {
                    return self
                        .failed(
                            &store,
                            &options,
                            Some(node_id),
                            None,
                            EngineError::InternalError("queued node missing from compiled graph".to_string()),
                        )
                        .await;
                }
            };

            let visits = visit_counts.entry(node_id.clone()).or_insert(0);
            *visits += 1;
            if *visits > compiled.max_visits.max(1) {
                return self
                    .failed(
                        &store,
                        &options,
                        Some(node_id.clone()),
                        None,
                        EngineError::LoopBudgetExceeded { node_id: node_id.clone(), max_visits: compiled.max_visits },
                    )
                    .await;
            }

            let view = store.view(&node_id);
            let base_ctx = ExecutionContext {
                workflow_id: options.workflow_id,
                execution_id,
                input: store.inputs_value(),
                secrets: options.secrets.clone(),
                attempt: 0,
                verbose: options.verbose,
            };
            let node_started_at = Utc::now();

            let prep_result = match compiled.node.prep(&view, options.cancellation.clone()).await {
                Ok(v) => v,
                Err(NodeError::Cancelled) => {
                    return self.cancelled(&store, &options).await;
                }
                Err(e) => {
                    info!(node = %node_id, phase = "prep", "node prep failed");
                    if let Some(target) = compiled.successors.get("error") {
                        store.set(&node_id, "error", error_record(node_error_kind(&e), e.to_string(), 1, e.to_string()));
                        queue.push_back(target.clone());
                        continue;
                    }
                    return self
                        .failed(&store, &options, Some(node_id.clone()), Some(Phase::Prep), translate(&node_id, e, Duration::ZERO))
                        .await;
                }
            };

            let interface = compiled.node.interface();
            let mut attempt = 0u32;
            let (mut exec_outcome, mut exec_elapsed) =
                exec_with_timeout(compiled.node.as_ref(), prep_result.clone(), &with_attempt(&base_ctx, attempt), interface.timeout).await;
            while let Err(e) = &exec_outcome {
                if !e.is_retryable() || attempt >= interface.max_retries {
                    break;
                }
                attempt += 1;
                warn!(node = %node_id, attempt, "retrying node exec");
                if interface.retry_delay > std::time::Duration::ZERO {
                    tokio::time::sleep(interface.retry_delay).await;
                }
                let (outcome, elapsed) =
                    exec_with_timeout(compiled.node.as_ref(), prep_result.clone(), &with_attempt(&base_ctx, attempt), interface.timeout).await;
                exec_outcome = outcome;
                exec_elapsed = elapsed;
            }

            let exec_result = match exec_outcome {
                Ok(v) => v,
                Err(e) => {
                    let original_message = e.to_string();
                    match compiled.node.exec_fallback(prep_result.clone(), e).await {
                        Ok(v) => v,
                        Err(e2) => {
                            if let Some(target) = compiled.successors.get("error") {
                                store.set(
                                    &node_id,
                                    "error",
                                    error_record(node_error_kind(&e2), e2.to_string(), attempt + 1, original_message),
                                );
                                queue.push_back(target.clone());
                                continue;
                            }
                            return self
                                .failed(
                                    &store,
                                    &options,
                                    Some(node_id.clone()),
                                    Some(Phase::Exec),
                                    translate(&node_id, e2, exec_elapsed),
                                )
                                .await;
                        }
                    }
                }
            };

            let action = match compiled.node.post(&view, prep_result.clone(), exec_result.clone()).await {
                Ok(a) => a,
                Err(e) => {
                    if let Some(target) = compiled.successors.get("error") {
                        store.set(&node_id, "error", error_record(node_error_kind(&e), e.to_string(), 1, e.to_string()));
                        queue.push_back(target.clone());
                        continue;
                    }
                    return self
                        .failed(&store, &options, Some(node_id.clone()), Some(Phase::Post), translate(&node_id, e, Duration::ZERO))
                        .await;
                }
            };

            if let Some(p) = &self.config.persistence {
                let namespace_snapshot = store.namespace_value(&node_id).unwrap_or(Value::Null);
                p.on_node_completed(
                    execution_id,
                    &node_id,
                    prep_result,
                    exec_result,
                    "succeeded",
                    &action,
                    namespace_snapshot,
                    node_started_at,
                )
                .await;
            }

            if let Some(target) = compiled.successors.get(&action) {
                queue.push_back(target.clone());
            }
        }

        self.succeeded(&store, &options).await
    }

    async fn succeeded(&self, store: &SharedStore, options: &RunOptions) -> RunResult {
        let mut outputs = serde_json::Map::new();
        for (name, template) in &self.graph.outputs {
            match template.resolve(store) {
                Ok(v) => {
                    outputs.insert(name.clone(), v);
                }
                Err(e) => {
                    return self
                        .failed(
                            store,
                            options,
                            None,
                            None,
                            EngineError::UnresolvedTemplate(format!("output '{name}': {e}")),
                        )
                        .await;
                }
            }
        }
        self.notify_finished(store.run_id(), RunStatus::Success, None).await;
        RunResult {
            status: RunStatus::Success,
            run_id: store.run_id(),
            outputs,
            diagnostics: options.compile_diagnostics.clone(),
            failed_node: None,
            phase: None,
            error: None,
            partial_outputs: serde_json::Map::new(),
            store_snapshot: self.config.capture_snapshot.then(|| store.snapshot()),
        }
    }

    async fn failed(
        &self,
        store: &SharedStore,
        options: &RunOptions,
        failed_node: Option<String>,
        phase: Option<Phase>,
        error: EngineError,
    ) -> RunResult {
        let message = error.to_string();
        self.notify_finished(store.run_id(), RunStatus::Failed, Some(&message)).await;
        RunResult {
            status: RunStatus::Failed,
            run_id: store.run_id(),
            outputs: serde_json::Map::new(),
            diagnostics: options.compile_diagnostics.clone(),
            failed_node,
            phase,
            error: Some(message),
            partial_outputs: partial_outputs(store),
            store_snapshot: Some(store.snapshot()),
        }
    }

    async fn cancelled(&self, store: &SharedStore, options: &RunOptions) -> RunResult {
        self.notify_finished(store.run_id(), RunStatus::Cancelled, None).await;
        RunResult {
            status: RunStatus::Cancelled,
            run_id: store.run_id(),
            outputs: serde_json::Map::new(),
            diagnostics: options.compile_diagnostics.clone(),
            failed_node: None,
            phase: None,
            error: Some(EngineError::CancellationRequested.to_string()),
            partial_outputs: partial_outputs(store),
            store_snapshot: Some(store.snapshot()),
        }
    }

    async fn notify_finished(&self, execution_id: Uuid, status: RunStatus, error: Option<&str>) {
        if let Some(p) = &self.config.persistence {
            p.on_run_finished(execution_id, status, error).await;
        }
    }
}

fn partial_outputs(store: &SharedStore) -> serde_json::Map<String, Value> {
    match store.snapshot() {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

fn with_attempt(ctx: &ExecutionContext, attempt: u32) -> ExecutionContext {
    let mut next = ctx.clone();
    next.attempt = attempt;
    next
}

fn translate(node_id: &str, error: NodeError, elapsed: Duration) -> EngineError {
    match error {
        NodeError::Retryable(msg) | NodeError::Fatal(msg) => {
            EngineError::NodeFailure { node_id: node_id.to_string(), message: msg }
        }
        NodeError::Timeout(_) => EngineError::NodeTimeout { node_id: node_id.to_string(), elapsed_ms: elapsed.as_millis() },
        NodeError::ScopeViolation { owner, key } => {
            EngineError::ScopeViolation { node_id: node_id.to_string(), target_namespace: owner, key }
        }
        NodeError::UnresolvedPath(path) => EngineError::UnresolvedTemplate(path),
        NodeError::Cancelled => EngineError::CancellationRequested,
    }
}

/// Apply a node's declared `exec` timeout, if any. Returns the outcome and
/// how long the attempt actually took, so a timeout failure can carry an
/// accurate `elapsed_ms` into `EngineError::NodeTimeout`.
async fn exec_with_timeout(
    node: &dyn Node,
    prep_result: Value,
    ctx: &ExecutionContext,
    timeout: Option<Duration>,
) -> (Result<Value, NodeError>, Duration) {
    let started = Instant::now();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, node.exec(prep_result, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout(format!("exec exceeded {limit:?}"))),
        },
        None => node.exec(prep_result, ctx).await,
    };
    (outcome, started.elapsed())
}

/// Discriminant written into a failing node's `error.kind` namespace entry.
fn node_error_kind(error: &NodeError) -> &'static str {
    match error {
        NodeError::Retryable(_) => "retryable",
        NodeError::Fatal(_) => "fatal",
        NodeError::Timeout(_) => "timeout",
        NodeError::ScopeViolation { .. } => "scope_violation",
        NodeError::UnresolvedPath(_) => "unresolved_path",
        NodeError::Cancelled => "cancelled",
    }
}

/// Build the `{kind, message, attempts, last_cause}` record written into a
/// node's own namespace before it is rerouted via its declared `"error"`
/// action (spec: a downstream node reading `${<node>.error.*}` must be able
/// to see why the node it's handling failed).
fn error_record(kind: &str, message: impl Into<String>, attempts: u32, last_cause: impl Into<String>) -> Value {
    serde_json::json!({
        "kind": kind,
        "message": message.into(),
        "attempts": attempts,
        "last_cause": last_cause.into(),
    })
}

/// Merge declared defaults into unset input keys and coerce every supplied
/// value to its declared `InputType`, failing hard on a required input with
/// neither a caller value nor a default (the validator already rejects this
/// shape at compile time; this is the runtime backstop for IR built and run
/// without going through `validate_ir` first, e.g. in tests).
fn resolve_inputs(
    declared: &std::collections::BTreeMap<String, crate::models::InputSpec>,
    raw: &serde_json::Map<String, Value>,
) -> Result<serde_json::Map<String, Value>, EngineError> {
    let mut resolved = raw.clone();
    for (name, spec) in declared {
        match resolved.get(name) {
            Some(value) => {
                let coerced = coerce::coerce(value, spec.ty).map_err(|e| EngineError::InvalidInput {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
                resolved.insert(name.clone(), coerced);
            }
            None => {
                if let Some(default) = &spec.default {
                    resolved.insert(name.clone(), default.clone());
                } else if spec.required {
                    return Err(EngineError::InvalidInput {
                        name: name.clone(),
                        message: "required input missing and no default declared".to_string(),
                    });
                }
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Compiler;
    use crate::models::{EdgeSpec, NodeSpec, WorkflowIr};
    use crate::registry::NodeRegistry;
    use nodes::mock::MockNode;
    use nodes::Node;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn registry() -> NodeRegistry {
        let mut r = NodeRegistry::new();
        r.register("ok", || Box::new(MockNode::returning("ok", json!({ "value": 1 }))) as Box<dyn Node>)
            .unwrap();
        r.register("boom", || Box::new(MockNode::failing_fatal("boom", "kaboom")) as Box<dyn Node>)
            .unwrap();
        r
    }

    fn linear_ir(types: &[(&str, &str)]) -> WorkflowIr {
        let nodes: Vec<NodeSpec> = types
            .iter()
            .map(|(id, ty)| NodeSpec { id: id.to_string(), node_type: ty.to_string(), params: serde_json::Map::new() })
            .collect();
        let edges: Vec<EdgeSpec> = types
            .windows(2)
            .map(|w| EdgeSpec { from: w[0].0.to_string(), to: w[1].0.to_string(), action: "default".to_string() })
            .collect();
        WorkflowIr {
            ir_version: "0.2".to_string(),
            id: None,
            name: None,
            trigger: None,
            inputs: BTreeMap::new(),
            nodes,
            edges,
            start_node: Some(types[0].0.to_string()),
            outputs: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn linear_pipeline_succeeds() {
        let ir = linear_ir(&[("a", "ok"), ("b", "ok")]);
        let compiled = Compiler::compile(&ir, &registry()).unwrap();
        let executor = Executor::new(&compiled, ExecutorConfig::default());
        let result = executor.run(RunOptions::new(Uuid::new_v4(), serde_json::Map::new())).await;
        assert_eq!(result.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn fatal_node_halts_run_with_no_error_action() {
        let ir = linear_ir(&[("a", "ok"), ("b", "boom"), ("c", "ok")]);
        let compiled = Compiler::compile(&ir, &registry()).unwrap();
        let executor = Executor::new(&compiled, ExecutorConfig::default());
        let result = executor.run(RunOptions::new(Uuid::new_v4(), serde_json::Map::new())).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failed_node.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn loop_budget_exceeded_halts_run() {
        let mut ir = linear_ir(&[("a", "ok")]);
        ir.edges.push(EdgeSpec { from: "a".into(), to: "a".into(), action: "default".into() });
        ir.start_node = Some("a".to_string());
        let compiled = Compiler::compile(&ir, &registry()).unwrap();
        let executor = Executor::new(&compiled, ExecutorConfig::default());
        let result = executor.run(RunOptions::new(Uuid::new_v4(), serde_json::Map::new())).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.unwrap().contains("loop budget"));
    }
}
