//! Graph executor contract — the external collaborator that performs the
//! actual task logic and emits events.
//!
//! The worker hands an executor the job payload, an [`ExecutionContext`]
//! (thread addressing, checkpoint-store handle, cancel probe), and an
//! [`EventEmitter`] that assigns gap-free sequence numbers. An executor must
//! emit zero or more `token`/`metadata`/`error` events followed by exactly
//! one terminal `done` (or a finalizing `error` + `done`), and must poll the
//! cancel flag between discrete steps.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::checkpoint::{CheckpointMetadata, Checkpointer, ThreadConfig};
use crate::error::Result;
use crate::event::{ErrorCode, MetadataKind, MetadataPayload, StreamEvent};
use crate::job::JobPayload;
use crate::queue::{CancelFlags, EventLog};

/// Per-job execution environment handed to the graph executor.
pub struct ExecutionContext {
    pub thread: ThreadConfig,
    pub checkpointer: Arc<dyn Checkpointer>,
    cancels: CancelFlags,
    job_id: String,
}

impl ExecutionContext {
    pub fn new(
        thread: ThreadConfig,
        checkpointer: Arc<dyn Checkpointer>,
        cancels: CancelFlags,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            thread,
            checkpointer,
            cancels,
            job_id: job_id.into(),
        }
    }

    /// Whether cancellation has been requested for this job. Cancellation
    /// is advisory; executors poll this between steps. A store hiccup reads
    /// as "not cancelled" so execution is never wedged on the flag.
    pub async fn cancelled(&self) -> bool {
        match self.cancels.is_set(&self.job_id).await {
            Ok(set) => set,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "cancel flag unreadable");
                false
            }
        }
    }
}

/// Writes a job's events to the log with strictly increasing, gap-free
/// sequence numbers. Once the terminal event lands the emitter refuses
/// further appends, keeping the closed-log invariant.
pub struct EventEmitter<'a> {
    log: &'a EventLog,
    job_id: &'a str,
    trace_id: &'a str,
    seq: u64,
    closed: bool,
}

impl<'a> EventEmitter<'a> {
    /// `start_seq` is the resume point — the last sequence number already
    /// on the log (0 for a fresh job).
    pub fn new(log: &'a EventLog, job_id: &'a str, trace_id: &'a str, start_seq: u64) -> Self {
        Self {
            log,
            job_id,
            trace_id,
            seq: start_seq,
            closed: false,
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.seq
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn token(&mut self, content: impl Into<String>) -> Result<()> {
        let event = StreamEvent::token(self.trace_id, self.seq + 1, content);
        self.push(event).await
    }

    pub async fn metadata(&mut self, payload: &MetadataPayload) -> Result<()> {
        let event = StreamEvent::metadata(self.trace_id, self.seq + 1, payload);
        self.push(event).await
    }

    pub async fn error(&mut self, code: ErrorCode, message: impl Into<String>) -> Result<()> {
        let event = StreamEvent::error(self.trace_id, self.seq + 1, code, message);
        self.push(event).await
    }

    /// Emit the terminal event and close the stream. Idempotent: a second
    /// call is dropped so only one terminal event ever lands.
    pub async fn done(&mut self) -> Result<()> {
        if self.closed {
            debug!(job_id = %self.job_id, "stream already closed; dropping duplicate done");
            return Ok(());
        }
        let event = StreamEvent::done(self.trace_id, self.seq + 1);
        self.push(event).await?;
        self.closed = true;
        Ok(())
    }

    async fn push(&mut self, event: StreamEvent) -> Result<()> {
        if self.closed {
            debug!(job_id = %self.job_id, event_type = %event.event_type, "stream closed; dropping event");
            return Ok(());
        }
        self.log.push_event(self.job_id, &event).await?;
        // advance only after a successful append so seqs stay gap-free
        self.seq = event.seq;
        Ok(())
    }
}

/// The external collaborator that executes one job.
#[async_trait]
pub trait GraphExecutor: Send + Sync {
    async fn execute(
        &self,
        job: &JobPayload,
        ctx: &ExecutionContext,
        emitter: &mut EventEmitter<'_>,
    ) -> Result<()>;
}

/// Placeholder executor used until a real conversation graph is wired in:
/// echoes the query as a single token and snapshots the turn.
pub struct EchoExecutor;

#[async_trait]
impl GraphExecutor for EchoExecutor {
    async fn execute(
        &self,
        job: &JobPayload,
        ctx: &ExecutionContext,
        emitter: &mut EventEmitter<'_>,
    ) -> Result<()> {
        emitter
            .metadata(&MetadataPayload::new(MetadataKind::NodeStart, "generating answer").with_node("answer"))
            .await?;

        if ctx.cancelled().await {
            emitter
                .error(ErrorCode::Cancelled, ErrorCode::Cancelled.user_message())
                .await?;
            emitter.done().await?;
            return Ok(());
        }

        emitter.token(format!("echo: {}", job.query)).await?;

        let metadata = CheckpointMetadata {
            node: Some("answer".to_string()),
            ..Default::default()
        };
        let state = json!({
            "last_user_message": job.query,
            "last_assistant_message": format!("echo: {}", job.query),
            "trace_id": job.trace_id,
        });
        ctx.checkpointer
            .put(
                &ctx.thread,
                state,
                metadata,
                BTreeMap::from([("messages".to_string(), 1)]),
            )
            .await?;

        emitter
            .metadata(&MetadataPayload::new(MetadataKind::NodeEnd, "answer complete").with_node("answer"))
            .await?;
        emitter.done().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointer;
    use crate::event::EventKind;
    use crate::store::{MemoryBackend, StoreBackend};
    use std::time::Duration;

    fn harness() -> (Arc<dyn StoreBackend>, EventLog, CancelFlags) {
        let backend: Arc<dyn StoreBackend> = Arc::new(MemoryBackend::new());
        let log = EventLog::new(Arc::clone(&backend), "jobs:stream", Duration::from_secs(60));
        let cancels = CancelFlags::new(Arc::clone(&backend), "jobs:cancel", Duration::from_secs(60));
        (backend, log, cancels)
    }

    #[tokio::test]
    async fn emitter_assigns_contiguous_seqs() {
        let (_backend, log, _cancels) = harness();
        let mut emitter = EventEmitter::new(&log, "j1", "t1", 0);

        emitter.token("a").await.unwrap();
        emitter.token("b").await.unwrap();
        emitter.done().await.unwrap();
        assert_eq!(emitter.last_seq(), 3);

        for expected in 1..=3 {
            let event = log.pop_event("j1").await.unwrap().unwrap();
            assert_eq!(event.seq, expected);
        }
    }

    #[tokio::test]
    async fn emitter_resumes_from_start_seq() {
        let (_backend, log, _cancels) = harness();
        let mut emitter = EventEmitter::new(&log, "j1", "t1", 5);
        emitter.token("resumed").await.unwrap();

        let event = log.pop_event("j1").await.unwrap().unwrap();
        assert_eq!(event.seq, 6);
    }

    #[tokio::test]
    async fn emitter_refuses_events_after_done() {
        let (_backend, log, _cancels) = harness();
        let mut emitter = EventEmitter::new(&log, "j1", "t1", 0);

        emitter.done().await.unwrap();
        assert!(emitter.is_closed());
        emitter.token("late").await.unwrap();
        emitter.done().await.unwrap();

        // exactly one event — the terminal — ever landed
        let only = log.pop_event("j1").await.unwrap().unwrap();
        assert!(only.is_done());
        assert_eq!(log.pop_event("j1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn echo_executor_emits_terminal_done_and_checkpoints() {
        let (_backend, log, cancels) = harness();
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let ctx = ExecutionContext::new(
            ThreadConfig::new("th1"),
            checkpointer.clone(),
            cancels,
            "j1",
        );
        let job = JobPayload {
            job_id: "j1".to_string(),
            trace_id: "t1".to_string(),
            thread_id: "th1".to_string(),
            session_id: "s1".to_string(),
            query: "hi".to_string(),
            user_id: None,
            metadata: None,
            checkpoint_id: None,
        };

        let mut emitter = EventEmitter::new(&log, "j1", "t1", 0);
        EchoExecutor.execute(&job, &ctx, &mut emitter).await.unwrap();
        assert!(emitter.is_closed());

        let mut kinds = Vec::new();
        while let Some(event) = log.pop_event("j1").await.unwrap() {
            kinds.push(event.kind().unwrap());
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::Metadata,
                EventKind::Token,
                EventKind::Metadata,
                EventKind::Done
            ]
        );

        let saved = checkpointer
            .get(&ThreadConfig::new("th1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.state["last_user_message"], "hi");
    }

    #[tokio::test]
    async fn echo_executor_short_circuits_on_cancel() {
        let (_backend, log, cancels) = harness();
        cancels.set("j1").await.unwrap();
        let ctx = ExecutionContext::new(
            ThreadConfig::new("th1"),
            Arc::new(MemoryCheckpointer::new()),
            cancels,
            "j1",
        );
        let job = JobPayload {
            job_id: "j1".to_string(),
            trace_id: "t1".to_string(),
            thread_id: "th1".to_string(),
            session_id: "s1".to_string(),
            query: "hi".to_string(),
            user_id: None,
            metadata: None,
            checkpoint_id: None,
        };

        let mut emitter = EventEmitter::new(&log, "j1", "t1", 0);
        EchoExecutor.execute(&job, &ctx, &mut emitter).await.unwrap();

        let mut kinds = Vec::new();
        while let Some(event) = log.pop_event("j1").await.unwrap() {
            kinds.push((event.kind().unwrap(), event.error_code));
        }
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[1].0, EventKind::Error);
        assert_eq!(kinds[1].1, Some(ErrorCode::Cancelled));
        assert_eq!(kinds[2].0, EventKind::Done);
    }
}
