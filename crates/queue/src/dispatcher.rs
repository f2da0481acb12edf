//! In-process notification channel between the API layer and a local
//! worker loop.
//!
//! This is purely a latency optimization: the durable source of truth is
//! still the `job_queue` table polled via [`crate::poller`]. A dropped or
//! full channel just means the worker picks the job up on its next poll
//! tick instead of immediately.

use tokio::sync::mpsc;
use uuid::Uuid;

/// Announces that a job was just enqueued and is ready for pickup.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobNotice {
    pub job_id: Uuid,
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
}

/// Sending half of the dispatch channel. Cheap to clone; handed to every
/// API handler that enqueues a job.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<JobNotice>,
}

/// Receiving half, owned by the worker loop.
pub struct DispatcherReceiver {
    receiver: mpsc::Receiver<JobNotice>,
}

impl Dispatcher {
    /// Create a linked dispatcher/receiver pair. `capacity` bounds how many
    /// unconsumed notices can queue up before `notify` starts dropping them.
    pub fn new(capacity: usize) -> (Self, DispatcherReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, DispatcherReceiver { receiver })
    }

    /// Wake a listening worker. Never blocks or errors outward: a full
    /// channel just falls back to the next poll tick.
    pub fn notify(&self, notice: JobNotice) {
        if let Err(e) = self.sender.try_send(notice) {
            tracing::debug!(error = %e, "dispatcher channel full or closed, falling back to poll");
        }
    }
}

impl DispatcherReceiver {
    /// Wait for the next notice. Returns `None` once every `Dispatcher`
    /// clone has been dropped.
    pub async fn recv(&mut self) -> Option<JobNotice> {
        self.receiver.recv().await
    }
}
