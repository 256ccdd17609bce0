//! Worker system — queue consumption with uniform failure, backoff, and
//! graceful-stop behavior.
//!
//! Core components:
//! - `poll` — the reusable poll-loop template (async and blocking variants)
//! - `job_worker` — the concrete worker that executes conversational jobs

pub mod job_worker;
pub mod poll;

pub use job_worker::{JobWorker, WorkerDeps};
pub use poll::{BlockingPollWorker, PollConfig, PollWorker, StopFlag};
