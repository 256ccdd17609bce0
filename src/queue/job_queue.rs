//! FIFO job queue shared by any number of worker processes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CodecError, Result};
use crate::job::JobPayload;
use crate::store::StoreBackend;

/// Single shared FIFO channel of pending job payloads.
///
/// The backend's pop primitive is atomic, so concurrent dequeuers race for
/// distinct elements — each queued job is handed to exactly one caller.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn StoreBackend>,
    key: String,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn StoreBackend>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    /// Validate and append a job to the tail of the queue. Returns the
    /// queue length after the append.
    pub async fn enqueue(&self, payload: &JobPayload) -> Result<u64> {
        payload.validate()?;
        let serialized = serde_json::to_string(payload)
            .map_err(|e| CodecError::Serialize(e.to_string()))?;
        let length = self.backend.push_back(&self.key, &serialized).await?;
        debug!(job_id = %payload.job_id, queue_len = length, "job enqueued");
        Ok(length)
    }

    /// Remove and return the head of the queue.
    ///
    /// Empty is a normal poll result, not an error. A record that fails to
    /// deserialize (or is missing required fields) is logged and treated as
    /// empty — a malformed entry must not wedge the worker loop.
    pub async fn dequeue(&self) -> Result<Option<JobPayload>> {
        let Some(raw) = self.backend.pop_front(&self.key).await? else {
            return Ok(None);
        };

        let payload: JobPayload = match serde_json::from_str(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "dropping undeserializable job record");
                return Ok(None);
            }
        };
        if let Err(e) = payload.validate() {
            warn!(error = %e, "dropping job record with missing fields");
            return Ok(None);
        }
        Ok(Some(payload))
    }
}
