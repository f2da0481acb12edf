//! `MockNode` — a test double for `Node`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant. Reads its `input` parameter in `prep`
//! (as resolved and written into its own namespace by the template-aware
//! wrapper), merges it with a fixed return value in `exec`, and writes the
//! result under `output` in `post`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{Node, NodeError, NodeInterface};
use crate::traits::{ExecutionContext, StoreView};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions and written into `output.node`.
    pub name: String,
    /// What the node will do when `exec` is called.
    pub behaviour: MockBehaviour,
    /// All `prep` inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::ReturnValue(value),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailFatal(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailRetryable(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Node for MockNode {
    fn interface(&self) -> NodeInterface {
        NodeInterface {
            reads: vec!["input".to_string()],
            writes: vec!["output".to_string(), "node".to_string()],
            actions: vec!["default".to_string(), "error".to_string()],
            ..Default::default()
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn prep(&self, view: &dyn StoreView, _cancellation: CancellationToken) -> Result<Value, NodeError> {
        Ok(view.own("input").unwrap_or(Value::Null))
    }

    async fn exec(&self, prep_result: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        self.calls.lock().unwrap().push(prep_result.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Merge the incoming input with the node's own output field so
                // tests can trace the data flowing through the pipeline.
                let mut out = json!({ "node": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(out)
            }
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
        }
    }

    async fn post(
        &self,
        view: &dyn StoreView,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<String, NodeError> {
        if let Some(node) = exec_result.get("node") {
            view.write("node", node.clone())?;
        }
        view.write("output", exec_result)?;
        Ok("default".to_string())
    }
}
