//! Integration tests for compile + execute, exercising the wrapper chain,
//! template resolution, retries, and error-action routing together rather
//! than unit-by-unit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::compile::Compiler;
use crate::executor::{Executor, ExecutorConfig, RunOptions, RunStatus};
use crate::models::{EdgeSpec, NodeSpec, WorkflowIr};
use crate::registry::NodeRegistry;
use nodes::mock::MockNode;
use nodes::traits::{ExecutionContext, StoreView};
use nodes::{Node, NodeError, NodeInterface};

#[tokio::test]
async fn template_resolved_param_flows_between_nodes() {
    let mut registry = NodeRegistry::new();
    registry
        .register("producer", || Box::new(MockNode::returning("producer", json!({ "count": 7 }))) as Box<dyn Node>)
        .unwrap();
    registry
        .register("consumer", || Box::new(MockNode::returning("consumer", json!({}))) as Box<dyn Node>)
        .unwrap();

    let mut consumer_params = serde_json::Map::new();
    consumer_params.insert("input".to_string(), json!("${producer.output.count}"));

    let ir = WorkflowIr {
        ir_version: "0.2".to_string(),
        id: None,
        name: None,
        trigger: None,
        inputs: BTreeMap::new(),
        nodes: vec![
            NodeSpec { id: "producer".into(), node_type: "producer".into(), params: serde_json::Map::new() },
            NodeSpec { id: "consumer".into(), node_type: "consumer".into(), params: consumer_params },
        ],
        edges: vec![EdgeSpec { from: "producer".into(), to: "consumer".into(), action: "default".into() }],
        start_node: Some("producer".to_string()),
        outputs: {
            let mut o = BTreeMap::new();
            o.insert("final_count".to_string(), "${consumer.output.count}".to_string());
            o
        },
    };

    let compiled = Compiler::compile(&ir, &registry).unwrap();
    let executor = Executor::new(&compiled, ExecutorConfig::default());
    let result = executor.run(RunOptions::new(Uuid::new_v4(), serde_json::Map::new())).await;

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.outputs.get("final_count"), Some(&json!(7)));
}

#[tokio::test]
async fn retryable_failure_exhausts_then_routes_via_error_action() {
    let mut registry = NodeRegistry::new();
    registry
        .register("flaky", || Box::new(MockNode::failing_retryable("flaky", "transient")) as Box<dyn Node>)
        .unwrap();
    registry
        .register("fallback", || Box::new(MockNode::returning("fallback", json!({ "recovered": true }))) as Box<dyn Node>)
        .unwrap();

    let ir = WorkflowIr {
        ir_version: "0.2".to_string(),
        id: None,
        name: None,
        trigger: None,
        inputs: BTreeMap::new(),
        nodes: vec![
            NodeSpec { id: "flaky".into(), node_type: "flaky".into(), params: serde_json::Map::new() },
            NodeSpec { id: "fallback".into(), node_type: "fallback".into(), params: serde_json::Map::new() },
        ],
        edges: vec![EdgeSpec { from: "flaky".into(), to: "fallback".into(), action: "error".into() }],
        start_node: Some("flaky".to_string()),
        outputs: BTreeMap::new(),
    };

    let compiled = Compiler::compile(&ir, &registry).unwrap();
    let config = ExecutorConfig { capture_snapshot: true, ..ExecutorConfig::default() };
    let executor = Executor::new(&compiled, config);
    let result = executor.run(RunOptions::new(Uuid::new_v4(), serde_json::Map::new())).await;

    // "flaky" exhausts its retries and has no `exec_fallback`, but it does
    // declare an "error" edge to "fallback" — the run reroutes there instead
    // of halting, and "fallback" succeeds, so the run as a whole succeeds.
    assert_eq!(result.status, RunStatus::Success);

    // The error that triggered the reroute is still visible in "flaky"'s own
    // namespace so a downstream node (or this test) can inspect why it
    // failed via `${flaky.error.*}`.
    let snapshot = result.store_snapshot.expect("capture_snapshot was enabled");
    let flaky_error = snapshot.get("flaky").and_then(|ns| ns.get("error")).expect("flaky.error was not written");
    assert_eq!(flaky_error.get("kind").and_then(|v| v.as_str()), Some("retryable"));
    assert!(flaky_error.get("message").and_then(|v| v.as_str()).unwrap().contains("transient"));
    assert_eq!(flaky_error.get("attempts").and_then(|v| v.as_u64()), Some(2));
}

#[tokio::test]
async fn batch_directive_aggregates_per_item_results() {
    let mut registry = NodeRegistry::new();
    registry
        .register("source", || Box::new(MockNode::returning("source", json!({ "items": [1, 2, 3] }))) as Box<dyn Node>)
        .unwrap();
    registry
        .register("worker", || Box::new(MockNode::returning("worker", json!({}))) as Box<dyn Node>)
        .unwrap();

    let mut batch_params = serde_json::Map::new();
    batch_params.insert(
        "batch".to_string(),
        json!({ "source": "source.output.items", "key": "item", "continue_on_error": false }),
    );

    let ir = WorkflowIr {
        ir_version: "0.2".to_string(),
        id: None,
        name: None,
        trigger: None,
        inputs: BTreeMap::new(),
        nodes: vec![
            NodeSpec { id: "source".into(), node_type: "source".into(), params: serde_json::Map::new() },
            NodeSpec { id: "worker".into(), node_type: "worker".into(), params: batch_params },
        ],
        edges: vec![EdgeSpec { from: "source".into(), to: "worker".into(), action: "default".into() }],
        start_node: Some("source".to_string()),
        outputs: BTreeMap::new(),
    };

    let compiled = Compiler::compile(&ir, &registry).unwrap();
    let executor = Executor::new(&compiled, ExecutorConfig::default());
    let result = executor.run(RunOptions::new(Uuid::new_v4(), serde_json::Map::new())).await;

    assert_eq!(result.status, RunStatus::Success);
}

/// A worker node that counts its own `exec` calls and fires a
/// `CancellationToken` once it reaches a target count, so a test can
/// deterministically simulate "cancellation arrives mid-batch" without
/// relying on real wall-clock timing.
struct CancelAfterN {
    calls: Arc<AtomicUsize>,
    cancel_at: usize,
    token: CancellationToken,
}

#[async_trait]
impl Node for CancelAfterN {
    fn interface(&self) -> NodeInterface {
        NodeInterface { reads: vec!["item".to_string()], writes: vec!["output".to_string()], ..Default::default() }
    }

    fn name(&self) -> &str {
        "cancel_after_n"
    }

    async fn prep(&self, view: &dyn StoreView, _cancellation: CancellationToken) -> Result<Value, NodeError> {
        Ok(view.own("item").unwrap_or(Value::Null))
    }

    async fn exec(&self, prep_result: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let seen = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if seen == self.cancel_at {
            self.token.cancel();
        }
        Ok(prep_result)
    }

    async fn post(&self, view: &dyn StoreView, _prep_result: Value, exec_result: Value) -> Result<String, NodeError> {
        view.write("output", exec_result)?;
        Ok("default".to_string())
    }
}

#[tokio::test]
async fn cancellation_mid_batch_stops_between_items_and_keeps_partial_results() {
    let items: Vec<Value> = (0..100).map(Value::from).collect();
    let cancellation = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = NodeRegistry::new();
    registry
        .register("source", {
            let items = items.clone();
            move || Box::new(MockNode::returning("source", json!({ "items": items }))) as Box<dyn Node>
        })
        .unwrap();
    registry
        .register("worker", {
            let calls = Arc::clone(&calls);
            let token = cancellation.clone();
            move || Box::new(CancelAfterN { calls: Arc::clone(&calls), cancel_at: 10, token: token.clone() }) as Box<dyn Node>
        })
        .unwrap();

    let mut batch_params = serde_json::Map::new();
    batch_params.insert(
        "batch".to_string(),
        json!({ "source": "source.output.items", "key": "item", "continue_on_error": false }),
    );

    let ir = WorkflowIr {
        ir_version: "0.2".to_string(),
        id: None,
        name: None,
        trigger: None,
        inputs: BTreeMap::new(),
        nodes: vec![
            NodeSpec { id: "source".into(), node_type: "source".into(), params: serde_json::Map::new() },
            NodeSpec { id: "worker".into(), node_type: "worker".into(), params: batch_params },
        ],
        edges: vec![EdgeSpec { from: "source".into(), to: "worker".into(), action: "default".into() }],
        start_node: Some("source".to_string()),
        outputs: BTreeMap::new(),
    };

    let compiled = Compiler::compile(&ir, &registry).unwrap();
    let config = ExecutorConfig { capture_snapshot: true, ..ExecutorConfig::default() };
    let executor = Executor::new(&compiled, config);
    let mut options = RunOptions::new(Uuid::new_v4(), serde_json::Map::new());
    options.cancellation = cancellation;
    let result = executor.run(options).await;

    // The signal fires inside item 10's `exec`; the batch loop only checks
    // it before starting the *next* item, so exactly 10 items complete and
    // no 11th `exec` call happens.
    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 10);

    let snapshot = result.store_snapshot.expect("capture_snapshot was enabled");
    let batch_results = snapshot
        .get("worker")
        .and_then(|ns| ns.get("batch_results"))
        .and_then(Value::as_array)
        .expect("worker.batch_results was not written on cancellation");
    assert!(batch_results.len() >= 10);

    // Cancellation short-circuits `prep` itself, so the worker's own
    // per-item `post` (and hence the aggregate `post` that would set
    // `"output"`) never runs.
    assert!(snapshot.get("worker").map(|ns| !ns.contains_key("output")).unwrap_or(true));
}
