//! Concrete worker: consumes the job queue, drives the graph executor, and
//! reports events and status.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::checkpoint::{Checkpointer, ThreadConfig};
use crate::error::{Error, Result};
use crate::event::{ErrorCode, MetadataKind, MetadataPayload};
use crate::executor::{EventEmitter, ExecutionContext, GraphExecutor};
use crate::job::{JobPayload, JobStatus};
use crate::queue::{CancelFlags, EventLog, JobQueue, StatusStore};

use super::poll::{PollConfig, PollWorker};

/// Shared dependencies for job execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: JobQueue,
    pub log: EventLog,
    pub status: StatusStore,
    pub cancels: CancelFlags,
    pub checkpointer: Arc<dyn Checkpointer>,
    pub executor: Arc<dyn GraphExecutor>,
}

/// Worker that executes conversational jobs pulled from the shared queue.
///
/// Delivery is at-least-once: a job redelivered after a crash resumes its
/// event stream from the log's last sequence number rather than starting
/// over at 1.
pub struct JobWorker {
    deps: WorkerDeps,
    poll: PollConfig,
}

impl JobWorker {
    pub fn new(deps: WorkerDeps, poll: PollConfig) -> Self {
        Self { deps, poll }
    }

    async fn process(&self, job: JobPayload) -> Result<()> {
        let deps = &self.deps;
        let job_id = job.job_id.clone();
        info!(job_id = %job_id, trace_id = %job.trace_id, "job picked up");

        let start_seq = deps.log.get_last_seq(&job_id).await;
        let mut emitter = EventEmitter::new(&deps.log, &job_id, &job.trace_id, start_seq);

        // Cancellation observed before execution starts: close the stream
        // without invoking the executor. Store errors propagate for backoff.
        if deps.cancels.is_set(&job_id).await? {
            info!(job_id = %job_id, "job cancelled before execution");
            emitter
                .metadata(
                    &MetadataPayload::new(MetadataKind::JobError, "job cancelled before execution")
                        .with_error_code(ErrorCode::Cancelled),
                )
                .await?;
            emitter
                .error(ErrorCode::Cancelled, ErrorCode::Cancelled.user_message())
                .await?;
            emitter.done().await?;
            return Ok(());
        }

        deps.status
            .transition(&job_id, JobStatus::Running, emitter.last_seq())
            .await?;
        emitter
            .metadata(&MetadataPayload::new(MetadataKind::JobStart, "worker execution started"))
            .await?;

        let mut thread = ThreadConfig::new(job.thread_id.clone());
        thread.checkpoint_id = job.checkpoint_id.clone();
        let ctx = ExecutionContext::new(
            thread,
            Arc::clone(&deps.checkpointer),
            deps.cancels.clone(),
            &job_id,
        );

        match deps.executor.execute(&job, &ctx, &mut emitter).await {
            Ok(()) => {
                if !emitter.is_closed() {
                    // executor forgot its terminal event; never leave the
                    // stream hanging open
                    warn!(job_id = %job_id, "executor finished without a terminal event");
                    emitter.done().await?;
                }
                deps.status
                    .transition(&job_id, JobStatus::Done, emitter.last_seq())
                    .await?;
                info!(job_id = %job_id, last_seq = emitter.last_seq(), "job completed");
                Ok(())
            }
            Err(Error::Store(e)) => {
                // transient backend failure; the loop backs off and the
                // queue's at-least-once contract covers the rest
                warn!(job_id = %job_id, error = %e, "store failure during execution");
                Err(Error::Store(e))
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "graph execution failed");
                let code = match &err {
                    Error::Execution(e) => e.code(),
                    _ => ErrorCode::Unknown,
                };
                if !emitter.is_closed() {
                    let finalize = async {
                        emitter.error(code, code.user_message()).await?;
                        emitter.done().await
                    };
                    if let Err(push_err) = finalize.await {
                        warn!(job_id = %job_id, error = %push_err, "failed to finalize stream");
                    }
                }
                deps.status
                    .transition(&job_id, JobStatus::Failed, emitter.last_seq())
                    .await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PollWorker for JobWorker {
    type Job = JobPayload;

    fn poll_config(&self) -> PollConfig {
        self.poll
    }

    async fn fetch_job(&self) -> Result<Option<JobPayload>> {
        self.deps.queue.dequeue().await
    }

    async fn handle_job(&self, job: JobPayload) -> Result<()> {
        self.process(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointer;
    use crate::error::ExecutionError;
    use crate::event::EventKind;
    use crate::executor::EchoExecutor;
    use crate::job::StatusRecord;
    use crate::store::{MemoryBackend, StoreBackend};
    use std::time::Duration;

    struct FailingExecutor;

    #[async_trait]
    impl GraphExecutor for FailingExecutor {
        async fn execute(
            &self,
            _job: &JobPayload,
            _ctx: &ExecutionContext,
            emitter: &mut EventEmitter<'_>,
        ) -> Result<()> {
            emitter.token("partial").await?;
            Err(ExecutionError::Failed {
                code: ErrorCode::Tool,
                reason: "tool blew up".to_string(),
            }
            .into())
        }
    }

    struct ForgetfulExecutor;

    #[async_trait]
    impl GraphExecutor for ForgetfulExecutor {
        async fn execute(
            &self,
            _job: &JobPayload,
            _ctx: &ExecutionContext,
            emitter: &mut EventEmitter<'_>,
        ) -> Result<()> {
            emitter.token("answer").await?;
            Ok(())
        }
    }

    fn worker_with(executor: Arc<dyn GraphExecutor>) -> (JobWorker, WorkerDeps) {
        let backend: Arc<dyn StoreBackend> = Arc::new(MemoryBackend::new());
        let deps = WorkerDeps {
            queue: JobQueue::new(Arc::clone(&backend), "jobs:pending"),
            log: EventLog::new(Arc::clone(&backend), "jobs:stream", Duration::from_secs(60)),
            status: StatusStore::new(Arc::clone(&backend), "jobs:status"),
            cancels: CancelFlags::new(Arc::clone(&backend), "jobs:cancel", Duration::from_secs(60)),
            checkpointer: Arc::new(MemoryCheckpointer::new()),
            executor,
        };
        (
            JobWorker::new(deps.clone(), PollConfig::default()),
            deps,
        )
    }

    fn payload() -> JobPayload {
        JobPayload {
            job_id: "j1".to_string(),
            trace_id: "t1".to_string(),
            thread_id: "th1".to_string(),
            session_id: "s1".to_string(),
            query: "hi".to_string(),
            user_id: None,
            metadata: None,
            checkpoint_id: None,
        }
    }

    async fn drain_kinds(log: &EventLog, job_id: &str) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Some(event) = log.pop_event(job_id).await.unwrap() {
            kinds.push(event.kind().unwrap());
        }
        kinds
    }

    #[tokio::test]
    async fn successful_job_ends_done() {
        let (worker, deps) = worker_with(Arc::new(EchoExecutor));
        deps.status
            .put(&StatusRecord {
                job_id: "j1".to_string(),
                status: JobStatus::Queued,
                last_seq: 0,
            })
            .await
            .unwrap();

        worker.process(payload()).await.unwrap();

        let kinds = drain_kinds(&deps.log, "j1").await;
        assert_eq!(kinds.first(), Some(&EventKind::Metadata)); // job_start
        assert_eq!(kinds.last(), Some(&EventKind::Done));

        let record = deps.status.get("j1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.last_seq, kinds.len() as u64);
    }

    #[tokio::test]
    async fn executor_failure_still_closes_the_stream() {
        let (worker, deps) = worker_with(Arc::new(FailingExecutor));

        worker.process(payload()).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = deps.log.pop_event("j1").await.unwrap() {
            events.push(event);
        }
        let error = events
            .iter()
            .find(|e| e.kind() == Some(EventKind::Error))
            .unwrap();
        assert_eq!(error.error_code, Some(ErrorCode::Tool));
        assert!(events.last().unwrap().is_done());

        let record = deps.status.get("j1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn forgetful_executor_gets_a_done_appended() {
        let (worker, deps) = worker_with(Arc::new(ForgetfulExecutor));

        worker.process(payload()).await.unwrap();

        let kinds = drain_kinds(&deps.log, "j1").await;
        assert_eq!(kinds.last(), Some(&EventKind::Done));
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::Done).count(),
            1
        );
    }

    #[tokio::test]
    async fn pre_cancelled_job_never_runs_the_executor() {
        let (worker, deps) = worker_with(Arc::new(EchoExecutor));
        deps.status
            .transition("j1", JobStatus::Cancelled, 0)
            .await
            .unwrap();
        deps.cancels.set("j1").await.unwrap();

        worker.process(payload()).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = deps.log.pop_event("j1").await.unwrap() {
            events.push(event);
        }
        // metadata(job_error) + error(cancelled) + done, no token output
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].error_code, Some(ErrorCode::Cancelled));
        assert!(events[2].is_done());

        // status stays cancelled
        let record = deps.status.get("j1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn redelivered_job_resumes_sequence_numbers() {
        let (worker, deps) = worker_with(Arc::new(EchoExecutor));
        // simulate a crashed first delivery that already emitted seq 1..=2
        deps.log
            .push_event("j1", &crate::event::StreamEvent::token("t1", 1, "a"))
            .await
            .unwrap();
        deps.log
            .push_event("j1", &crate::event::StreamEvent::token("t1", 2, "b"))
            .await
            .unwrap();

        worker.process(payload()).await.unwrap();

        let mut seqs = Vec::new();
        while let Some(event) = deps.log.pop_event("j1").await.unwrap() {
            seqs.push(event.seq);
        }
        // strictly increasing, gap-free across the redelivery boundary
        assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
    }
}
