//! Durable job pickup, backed by `db::repository::jobs`'s
//! `SELECT ... FOR UPDATE SKIP LOCKED` polling query.

use std::time::Duration;

use db::{models::JobRow, repository::jobs, DbError, DbPool};

use crate::dispatcher::DispatcherReceiver;

/// Tuning knobs for the polling fallback.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Upper bound on how long to wait for an in-process notice before
    /// falling back to a poll of the `job_queue` table.
    pub interval: Duration,
}

impl PollConfig {
    pub fn from_millis(interval_ms: u64) -> Self {
        Self { interval: Duration::from_millis(interval_ms) }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval: Duration::from_millis(500) }
    }
}

/// Wait for the next job to process: either an in-process [`Dispatcher`]
/// notice arrives, or `config.interval` elapses — whichever comes first —
/// and then attempt to atomically claim the oldest pending job.
///
/// Returns `Ok(None)` if no pending jobs exist at that moment; callers
/// should loop.
///
/// [`Dispatcher`]: crate::dispatcher::Dispatcher
pub async fn wait_for_job(
    pool: &DbPool,
    receiver: &mut DispatcherReceiver,
    config: &PollConfig,
) -> Result<Option<JobRow>, DbError> {
    tokio::select! {
        _ = receiver.recv() => {}
        _ = tokio::time::sleep(config.interval) => {}
    }
    jobs::fetch_next_job(pool).await
}
