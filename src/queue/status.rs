//! Keyed status records and cancel flags shared by the orchestration
//! service and the worker.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CodecError, Result};
use crate::job::{JobStatus, StatusRecord};
use crate::store::StoreBackend;

/// Store for `job_id → {status, last_seq}` records.
///
/// Writes are single-key atomic but `transition` is read-modify-write with
/// no cross-call transaction; derived status may briefly lag true state
/// under process failure between reads and writes.
#[derive(Clone)]
pub struct StatusStore {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
}

impl StatusStore {
    pub fn new(backend: Arc<dyn StoreBackend>, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
        }
    }

    fn status_key(&self, job_id: &str) -> String {
        format!("{}:{}", self.key_prefix, job_id)
    }

    /// Write a status record unconditionally. Used at job creation.
    pub async fn put(&self, record: &StatusRecord) -> Result<()> {
        let serialized =
            serde_json::to_string(record).map_err(|e| CodecError::Serialize(e.to_string()))?;
        self.backend
            .set_value(&self.status_key(&record.job_id), &serialized, None)
            .await?;
        Ok(())
    }

    /// Read the status record for `job_id`, if any. An unreadable record is
    /// logged and reported as absent.
    pub async fn get(&self, job_id: &str) -> Result<Option<StatusRecord>> {
        let Some(raw) = self.backend.get_value(&self.status_key(job_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(job_id, error = %e, "status record is unreadable");
                Ok(None)
            }
        }
    }

    /// Move the job's status forward, keeping `last_seq` at its maximum.
    ///
    /// Transitions out of a terminal state (and backward moves) are refused
    /// silently and the stored record is returned unchanged, so callers can
    /// report status after a lost race. A missing record is created at the
    /// target status.
    pub async fn transition(
        &self,
        job_id: &str,
        target: JobStatus,
        last_seq: u64,
    ) -> Result<StatusRecord> {
        let record = match self.get(job_id).await? {
            None => StatusRecord {
                job_id: job_id.to_string(),
                status: target,
                last_seq,
            },
            Some(mut record) => {
                if record.status != target && !record.status.can_transition_to(target) {
                    debug!(
                        job_id,
                        from = %record.status,
                        to = %target,
                        "status transition refused"
                    );
                    if last_seq > record.last_seq {
                        record.last_seq = last_seq;
                        self.put(&record).await?;
                    }
                    return Ok(record);
                }
                record.status = target;
                record.last_seq = record.last_seq.max(last_seq);
                record
            }
        };
        self.put(&record).await?;
        Ok(record)
    }
}

/// TTL-bounded cancellation markers, observed cooperatively by executors.
#[derive(Clone)]
pub struct CancelFlags {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
    ttl: Duration,
}

impl CancelFlags {
    pub fn new(backend: Arc<dyn StoreBackend>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    fn cancel_key(&self, job_id: &str) -> String {
        format!("{}:{}", self.key_prefix, job_id)
    }

    /// Mark `job_id` for cancellation. The flag expires after its TTL.
    pub async fn set(&self, job_id: &str) -> Result<()> {
        self.backend
            .set_value(&self.cancel_key(job_id), "1", Some(self.ttl))
            .await?;
        Ok(())
    }

    /// Whether a cancellation has been requested for `job_id`.
    pub async fn is_set(&self, job_id: &str) -> Result<bool> {
        Ok(self.backend.get_value(&self.cancel_key(job_id)).await?.is_some())
    }
}
