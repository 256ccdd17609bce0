//! Job orchestration service — the façade that creates jobs, exposes
//! status, streams events to a caller, and records cancellation requests.

use std::collections::VecDeque;
use std::time::Duration;

use futures::Stream;
use tracing::{info, warn};

use crate::error::{Result, ValidationError};
use crate::event::{ErrorCode, EventKind, StreamEvent};
use crate::job::{CancelAck, CreatedJob, JobPayload, JobRequest, JobStatus, StatusRecord, prefixed_id};
use crate::queue::{CancelFlags, EventLog, JobQueue, StatusStore};

/// The only component that touches the queue, the event log, the status
/// store, and the cancel flags together.
#[derive(Clone)]
pub struct JobService {
    queue: JobQueue,
    log: EventLog,
    status: StatusStore,
    cancels: CancelFlags,
    stream_poll_interval: Duration,
}

impl JobService {
    pub fn new(
        queue: JobQueue,
        log: EventLog,
        status: StatusStore,
        cancels: CancelFlags,
        stream_poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            log,
            status,
            cancels,
            stream_poll_interval,
        }
    }

    /// Validate the request, mint identifiers, enqueue the payload, and
    /// record the job as queued.
    pub async fn create_job(&self, request: JobRequest) -> Result<CreatedJob> {
        if request.query.trim().is_empty() {
            return Err(ValidationError::missing("query").into());
        }

        let job_id = prefixed_id("job");
        let trace_id = prefixed_id("trace");
        let thread_id = request
            .thread_id
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| prefixed_id("thread"));
        let session_id = request
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| prefixed_id("session"));

        let payload = JobPayload {
            job_id: job_id.clone(),
            trace_id: trace_id.clone(),
            thread_id: thread_id.clone(),
            session_id,
            query: request.query,
            user_id: request.user_id,
            metadata: request.metadata,
            checkpoint_id: request.checkpoint_id,
        };
        self.queue.enqueue(&payload).await?;
        self.status
            .put(&StatusRecord {
                job_id: job_id.clone(),
                status: JobStatus::Queued,
                last_seq: 0,
            })
            .await?;
        info!(job_id = %job_id, trace_id = %trace_id, thread_id = %thread_id, "job created");

        Ok(CreatedJob {
            job_id,
            trace_id,
            thread_id,
        })
    }

    /// Stream a job's events as wire-formatted lines.
    ///
    /// Polls the event log at the configured interval, suspending on empty
    /// polls — the stream never ends merely because the log was momentarily
    /// empty. It closes after yielding the `done` event. Status is updated
    /// as events are observed. A stream for an unknown job yields one
    /// `error` line and a `done` line, then closes.
    pub fn stream_events(&self, job_id: impl Into<String>) -> impl Stream<Item = String> + Send {
        let cursor = StreamCursor {
            log: self.log.clone(),
            status: self.status.clone(),
            job_id: job_id.into(),
            poll_interval: self.stream_poll_interval,
            last_seq: 0,
            pending: VecDeque::new(),
            started: false,
            finished: false,
        };
        futures::stream::unfold(cursor, |mut cursor| async move {
            cursor.next_line().await.map(|line| (line, cursor))
        })
    }

    /// Read the status record and the last known sequence number. `None`
    /// means the job is unknown.
    pub async fn get_status(&self, job_id: &str) -> Result<Option<StatusRecord>> {
        let Some(mut record) = self.status.get(job_id).await? else {
            return Ok(None);
        };
        // the log may be ahead of the stored record
        let log_seq = self.log.get_last_seq(job_id).await;
        if log_seq > record.last_seq {
            record.last_seq = log_seq;
        }
        Ok(Some(record))
    }

    /// Record a cancellation request. Cancellation is cooperative: the flag
    /// does not interrupt a worker mid-execution, so an already-running job
    /// may still emit a final `done` after being marked cancelled. A job
    /// already in a terminal state reports that state unchanged.
    pub async fn cancel(&self, job_id: &str) -> Result<Option<CancelAck>> {
        let Some(record) = self.status.get(job_id).await? else {
            return Ok(None);
        };
        if record.status.is_terminal() {
            return Ok(Some(CancelAck {
                job_id: job_id.to_string(),
                status: record.status,
            }));
        }

        self.cancels.set(job_id).await?;
        let record = self
            .status
            .transition(job_id, JobStatus::Cancelled, record.last_seq)
            .await?;
        info!(job_id, "job cancelled");
        Ok(Some(CancelAck {
            job_id: job_id.to_string(),
            status: record.status,
        }))
    }
}

struct StreamCursor {
    log: EventLog,
    status: StatusStore,
    job_id: String,
    poll_interval: Duration,
    last_seq: u64,
    pending: VecDeque<String>,
    started: bool,
    finished: bool,
}

impl StreamCursor {
    async fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(line);
            }
            if self.finished {
                return None;
            }
            if !self.started {
                self.started = true;
                if !self.job_exists().await {
                    self.push_unknown_job_lines();
                    continue;
                }
            }

            match self.log.pop_event(&self.job_id).await {
                Ok(Some(event)) => {
                    // a reconnecting consumer may see already-delivered
                    // records; anything at or below the resume point drops
                    if event.seq != 0 && event.seq <= self.last_seq {
                        continue;
                    }
                    if event.seq != 0 {
                        self.last_seq = event.seq;
                    }
                    self.track_status(&event).await;
                    if event.is_done() {
                        self.finished = true;
                    }
                    match event.to_wire_line() {
                        Ok(line) => return Some(line),
                        Err(e) => {
                            warn!(job_id = %self.job_id, error = %e, "failed to frame event");
                            if self.finished {
                                return None;
                            }
                        }
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    // backend outage degrades to retries, not a dead stream
                    warn!(job_id = %self.job_id, error = %e, "event poll failed; retrying");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn job_exists(&self) -> bool {
        match self.status.get(&self.job_id).await {
            Ok(record) => record.is_some(),
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "status lookup failed; assuming job exists");
                true
            }
        }
    }

    fn push_unknown_job_lines(&mut self) {
        let error = StreamEvent::error(
            self.job_id.clone(),
            1,
            ErrorCode::Unknown,
            "unknown job_id",
        );
        let done = StreamEvent::done(self.job_id.clone(), 2);
        for event in [error, done] {
            if let Ok(line) = event.to_wire_line() {
                self.pending.push_back(line);
            }
        }
        self.finished = true;
    }

    /// Move the status record along as the client observes events: the
    /// first event marks the job running, a finalizing error marks it
    /// failed, and `done` marks it done unless a terminal state (for
    /// example `cancelled`) already won.
    async fn track_status(&self, event: &StreamEvent) {
        let target = match event.kind() {
            Some(EventKind::Error) => {
                if event.error_code.is_none_or(|c| c.finalizes_stream()) {
                    JobStatus::Failed
                } else {
                    JobStatus::Running
                }
            }
            Some(EventKind::Done) => JobStatus::Done,
            _ => JobStatus::Running,
        };
        if let Err(e) = self
            .status
            .transition(&self.job_id, target, event.seq)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "status update failed");
        }
    }
}
