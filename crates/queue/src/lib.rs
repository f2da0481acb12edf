//! `queue` crate — job dispatch between the API layer and the worker.
//!
//! Two cooperating pieces: an in-process [`Dispatcher`] that wakes a local
//! worker the moment a job is enqueued, and [`poller::wait_for_job`], the
//! durable fallback that polls the `job_queue` Postgres table so the queue
//! still works correctly across worker restarts or multiple processes.

pub mod dispatcher;
pub mod poller;

pub use dispatcher::{Dispatcher, DispatcherReceiver, JobNotice};
pub use poller::{wait_for_job, PollConfig};
