//! Per-job sequenced event log with bounded retention after completion.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{CodecError, Result};
use crate::event::StreamEvent;
use crate::store::StoreBackend;

/// Append-only event sequence per job, tail-ordered on the shared store.
///
/// Producers supply `seq`; the log validates events and guards the append.
/// Once a `done` event lands, the job's sub-channel carries a TTL so
/// abandoned logs are reclaimed automatically.
#[derive(Clone)]
pub struct EventLog {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
    done_ttl: Duration,
}

impl EventLog {
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        key_prefix: impl Into<String>,
        done_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            done_ttl,
        }
    }

    fn stream_key(&self, job_id: &str) -> String {
        format!("{}:{}", self.key_prefix, job_id)
    }

    /// Validate and append an event to the job's log. Returns the log
    /// length after the append.
    pub async fn push_event(&self, job_id: &str, event: &StreamEvent) -> Result<u64> {
        event.validate()?;
        let key = self.stream_key(job_id);
        let serialized =
            serde_json::to_string(event).map_err(|e| CodecError::Serialize(e.to_string()))?;
        let length = self.backend.push_back(&key, &serialized).await?;
        if event.is_done() {
            self.backend.expire(&key, self.done_ttl).await?;
        }
        Ok(length)
    }

    /// Remove and return the oldest undelivered event, or `None` if the log
    /// is empty. Malformed records are logged and read as empty.
    pub async fn pop_event(&self, job_id: &str) -> Result<Option<StreamEvent>> {
        let key = self.stream_key(job_id);
        let Some(raw) = self.backend.pop_front(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                warn!(job_id, error = %e, "dropping undeserializable stream event");
                Ok(None)
            }
        }
    }

    /// The `seq` of the most recently appended event, or 0 if the log is
    /// empty or unreadable. This is the resume point a reconnecting client
    /// (or a redelivered job) supplies.
    pub async fn get_last_seq(&self, job_id: &str) -> u64 {
        self.get_last_event(job_id).await.map_or(0, |e| e.seq)
    }

    /// The most recent event without consuming it, or `None`.
    pub async fn get_last_event(&self, job_id: &str) -> Option<StreamEvent> {
        let key = self.stream_key(job_id);
        let raw = match self.backend.peek_back(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(job_id, error = %e, "failed to read last stream event");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(job_id, error = %e, "last stream event is unreadable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ValidationError};
    use crate::event::{ErrorCode, EventKind};
    use crate::store::MemoryBackend;

    fn log() -> EventLog {
        EventLog::new(
            Arc::new(MemoryBackend::new()),
            "jobs:stream",
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn events_pop_in_append_order() {
        let log = log();
        log.push_event("j1", &StreamEvent::token("t1", 1, "a"))
            .await
            .unwrap();
        log.push_event("j1", &StreamEvent::token("t1", 2, "b"))
            .await
            .unwrap();
        log.push_event("j1", &StreamEvent::done("t1", 3))
            .await
            .unwrap();

        let first = log.pop_event("j1").await.unwrap().unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(first.content.as_deref(), Some("a"));
        assert_eq!(log.pop_event("j1").await.unwrap().unwrap().seq, 2);
        assert!(log.pop_event("j1").await.unwrap().unwrap().is_done());
        assert_eq!(log.pop_event("j1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_event_leaves_log_unchanged() {
        let log = log();
        let mut event = StreamEvent::token("t1", 1, "a");
        event.content = None;

        let err = log.push_event("j1", &event).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::EventField { .. })
        ));
        assert_eq!(log.get_last_seq("j1").await, 0);
        assert_eq!(log.pop_event("j1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_seq_tracks_appends() {
        let log = log();
        assert_eq!(log.get_last_seq("j1").await, 0);

        for seq in 1..=4 {
            log.push_event("j1", &StreamEvent::token("t1", seq, "x"))
                .await
                .unwrap();
        }
        assert_eq!(log.get_last_seq("j1").await, 4);
        // peeking must not consume
        assert_eq!(log.get_last_seq("j1").await, 4);
    }

    #[tokio::test]
    async fn done_event_attaches_ttl() {
        let log = EventLog::new(
            Arc::new(MemoryBackend::new()),
            "jobs:stream",
            Duration::from_millis(5),
        );
        log.push_event("j1", &StreamEvent::token("t1", 1, "a"))
            .await
            .unwrap();
        log.push_event("j1", &StreamEvent::done("t1", 2))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.pop_event("j1").await.unwrap(), None);
        assert_eq!(log.get_last_seq("j1").await, 0);
    }

    #[tokio::test]
    async fn malformed_record_reads_as_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend.push_back("jobs:stream:j1", "garbage").await.unwrap();
        let log = EventLog::new(backend, "jobs:stream", Duration::from_secs(3600));

        assert_eq!(log.pop_event("j1").await.unwrap(), None);
        assert_eq!(log.get_last_seq("j1").await, 0);
    }

    #[tokio::test]
    async fn logs_are_isolated_per_job() {
        let log = log();
        log.push_event("j1", &StreamEvent::token("t1", 1, "a"))
            .await
            .unwrap();
        log.push_event("j2", &StreamEvent::error("t2", 1, ErrorCode::Timeout, "slow"))
            .await
            .unwrap();

        let e1 = log.pop_event("j1").await.unwrap().unwrap();
        assert_eq!(e1.kind(), Some(EventKind::Token));
        let e2 = log.pop_event("j2").await.unwrap().unwrap();
        assert_eq!(e2.kind(), Some(EventKind::Error));
    }
}
