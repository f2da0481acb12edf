//! The storage-agnostic observer the scheduler reports to as a run
//! progresses. Keeping this a trait (rather than a hard `db::DbPool` field
//! on `Executor`) means the core engine has no Postgres dependency; `db`
//! implements it, and the CLI/API/worker wire the two together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::executor::RunStatus;

/// Observes node- and run-level lifecycle events during execution.
///
/// Every method is a best-effort notification: a persistence failure must
/// never abort the run itself, so implementations should log and swallow
/// their own errors rather than propagate them back into the scheduler.
#[async_trait]
pub trait RunPersistence: Send + Sync {
    /// Called once, before the first node is queued.
    async fn on_run_started(&self, workflow_id: Uuid, execution_id: Uuid);

    /// Called after a node's `post` phase returns its routing action.
    ///
    /// `namespace_snapshot` is the node's own namespace as a JSON object at
    /// the moment `post` completed (debug/trace use only, per §3).
    #[allow(clippy::too_many_arguments)]
    async fn on_node_completed(
        &self,
        execution_id: Uuid,
        node_id: &str,
        input: Value,
        output: Value,
        status: &str,
        action: &str,
        namespace_snapshot: Value,
        started_at: DateTime<Utc>,
    );

    /// Called once, after the run reaches a terminal status.
    async fn on_run_finished(&self, execution_id: Uuid, status: RunStatus, error: Option<&str>);
}
