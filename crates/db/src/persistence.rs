//! `engine::RunPersistence` backed by the `workflow_executions` and
//! `node_executions` tables.
//!
//! Persistence failures are logged and swallowed rather than propagated —
//! a dropped trace record must never abort an in-flight run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine::{RunPersistence, RunStatus};
use serde_json::Value;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::repository::executions;

/// Postgres-backed implementation of the engine's run observer.
pub struct DbPersistence {
    pool: PgPool,
}

impl DbPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunPersistence for DbPersistence {
    async fn on_run_started(&self, workflow_id: Uuid, execution_id: Uuid) {
        // The execution row itself is created up-front by whatever enqueued
        // the job (`executions::create_execution`, called from the API
        // handler or the worker loop); this hook only marks it `running`.
        if let Err(e) = executions::update_execution_status(&self.pool, execution_id, "running", false).await {
            error!(%workflow_id, %execution_id, error = %e, "failed to mark execution as running");
        }
    }

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
    ) {
        if let Err(e) = executions::insert_node_execution(
            &self.pool,
            execution_id,
            node_id,
            input,
            Some(output),
            status,
            action,
            namespace_snapshot,
            started_at,
        )
        .await
        {
            error!(node = node_id, %execution_id, error = %e, "failed to persist node execution");
        }
    }

    async fn on_run_finished(&self, execution_id: Uuid, status: RunStatus, error_message: Option<&str>) {
        let status_str = match status {
            RunStatus::Success => "succeeded",
            RunStatus::Failed | RunStatus::Cancelled => "failed",
        };
        if let Some(message) = error_message {
            tracing::warn!(%execution_id, error = message, "run finished with error");
        }
        if let Err(e) = executions::update_execution_status(&self.pool, execution_id, status_str, true).await {
            error!(%execution_id, error = %e, "failed to update execution status");
        }
    }
}
