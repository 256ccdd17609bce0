//! Shared queue structures — job queue, per-job event logs, status records,
//! and cancel flags.

pub mod event_log;
pub mod job_queue;
pub mod status;

pub use event_log::EventLog;
pub use job_queue::JobQueue;
pub use status::{CancelFlags, StatusStore};
