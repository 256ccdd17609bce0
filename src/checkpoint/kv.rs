//! Checkpointer over a remote store backend.
//!
//! Key layout per thread:
//! - `{prefix}:index:{thread}` — ordered list of checkpoint ids
//! - `{prefix}:data:{thread}:{id}` — one serialized checkpoint
//! - `{prefix}:latest:{thread}` — indirection to the newest checkpoint id
//! - `{prefix}:writes:{thread}` — pending writes, bucketed per task
//!
//! Every write refreshes the configured TTL on the thread's keys, so idle
//! threads age out of the store together.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::error::{CodecError, Error};
use crate::job::prefixed_id;
use crate::store::StoreBackend;

use super::{
    Checkpoint, CheckpointFilter, CheckpointMetadata, Checkpointer, PendingWrite, ThreadConfig,
    writes_bucket,
};

/// Remote-store [`Checkpointer`]. Single-node or clustered depending on the
/// backend it is handed.
#[derive(Clone)]
pub struct StoreCheckpointer {
    backend: Arc<dyn StoreBackend>,
    key_prefix: String,
    ttl: Duration,
}

impl StoreCheckpointer {
    pub fn new(backend: Arc<dyn StoreBackend>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    fn index_key(&self, thread_id: &str) -> String {
        format!("{}:index:{thread_id}", self.key_prefix)
    }

    fn data_key(&self, thread_id: &str, checkpoint_id: &str) -> String {
        format!("{}:data:{thread_id}:{checkpoint_id}", self.key_prefix)
    }

    fn latest_key(&self, thread_id: &str) -> String {
        format!("{}:latest:{thread_id}", self.key_prefix)
    }

    fn writes_key(&self, thread_id: &str) -> String {
        format!("{}:writes:{thread_id}", self.key_prefix)
    }

    /// Resolve which checkpoint id `config` addresses: an explicit id, the
    /// latest pointer, or (if the pointer aged out ahead of the index) the
    /// index tail.
    async fn resolve_id(&self, config: &ThreadConfig) -> Result<Option<String>, Error> {
        if let Some(id) = &config.checkpoint_id {
            return Ok(Some(id.clone()));
        }
        if let Some(id) = self
            .backend
            .get_value(&self.latest_key(&config.thread_id))
            .await?
        {
            return Ok(Some(id));
        }
        Ok(self
            .backend
            .peek_back(&self.index_key(&config.thread_id))
            .await?)
    }

    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>, Error> {
        let Some(raw) = self
            .backend
            .get_value(&self.data_key(thread_id, checkpoint_id))
            .await?
        else {
            return Ok(None);
        };
        let checkpoint =
            serde_json::from_str(&raw).map_err(|e| CodecError::Deserialize(e.to_string()))?;
        Ok(Some(checkpoint))
    }

    async fn read_write_buckets(
        &self,
        thread_id: &str,
    ) -> Result<HashMap<String, Vec<PendingWrite>>, Error> {
        let Some(raw) = self.backend.get_value(&self.writes_key(thread_id)).await? else {
            return Ok(HashMap::new());
        };
        serde_json::from_str(&raw)
            .map_err(|e| CodecError::Deserialize(e.to_string()).into())
    }
}

#[async_trait]
impl Checkpointer for StoreCheckpointer {
    async fn put(
        &self,
        config: &ThreadConfig,
        state: serde_json::Value,
        metadata: CheckpointMetadata,
        new_versions: BTreeMap<String, u64>,
    ) -> Result<Checkpoint, Error> {
        let checkpoint = Checkpoint {
            checkpoint_id: prefixed_id("ckpt"),
            thread_id: config.thread_id.clone(),
            state,
            metadata,
            channel_versions: new_versions,
            created_at: Utc::now(),
        };

        let serialized = serde_json::to_string(&checkpoint)
            .map_err(|e| CodecError::Serialize(e.to_string()))?;
        let thread_id = &config.thread_id;

        self.backend
            .set_value(
                &self.data_key(thread_id, &checkpoint.checkpoint_id),
                &serialized,
                Some(self.ttl),
            )
            .await?;

        let index_key = self.index_key(thread_id);
        self.backend
            .push_back(&index_key, &checkpoint.checkpoint_id)
            .await?;
        self.backend.expire(&index_key, self.ttl).await?;

        // latest pointer last, so readers never see an id without data
        self.backend
            .set_value(
                &self.latest_key(thread_id),
                &checkpoint.checkpoint_id,
                Some(self.ttl),
            )
            .await?;

        Ok(checkpoint)
    }

    async fn put_writes(
        &self,
        config: &ThreadConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
    ) -> Result<(), Error> {
        let mut buckets = self.read_write_buckets(&config.thread_id).await?;
        buckets.insert(writes_bucket(config, task_id), writes);
        let serialized =
            serde_json::to_string(&buckets).map_err(|e| CodecError::Serialize(e.to_string()))?;
        self.backend
            .set_value(&self.writes_key(&config.thread_id), &serialized, Some(self.ttl))
            .await?;
        Ok(())
    }

    async fn get_writes(
        &self,
        config: &ThreadConfig,
        task_id: &str,
    ) -> Result<Vec<PendingWrite>, Error> {
        let buckets = self.read_write_buckets(&config.thread_id).await?;
        Ok(buckets
            .get(&writes_bucket(config, task_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn get(&self, config: &ThreadConfig) -> Result<Option<Checkpoint>, Error> {
        let Some(id) = self.resolve_id(config).await? else {
            return Ok(None);
        };
        self.load(&config.thread_id, &id).await
    }

    async fn list(
        &self,
        config: &ThreadConfig,
        before: Option<&str>,
        limit: Option<usize>,
        filter: Option<&CheckpointFilter>,
    ) -> Result<Vec<Checkpoint>, Error> {
        let ids = self
            .backend
            .list_all(&self.index_key(&config.thread_id))
            .await?;

        let mut results = Vec::new();
        let mut past_cursor = before.is_none();
        for id in ids.iter().rev() {
            if !past_cursor {
                past_cursor = Some(id.as_str()) == before;
                continue;
            }
            // data keys can age out ahead of the index entry; skip holes
            let checkpoint = match self.load(&config.thread_id, id).await {
                Ok(Some(checkpoint)) => checkpoint,
                Ok(None) => continue,
                Err(e) => {
                    warn!(thread_id = %config.thread_id, checkpoint_id = %id, error = %e, "skipping unreadable checkpoint");
                    continue;
                }
            };
            if filter.is_some_and(|f| !f.matches(&checkpoint.metadata)) {
                continue;
            }
            results.push(checkpoint);
            if limit.is_some_and(|l| results.len() >= l) {
                break;
            }
        }
        Ok(results)
    }

    async fn delete(&self, thread_id: &str) -> Result<(), Error> {
        let ids = self.backend.list_all(&self.index_key(thread_id)).await?;
        for id in &ids {
            self.backend.delete(&self.data_key(thread_id, id)).await?;
        }
        self.backend.delete(&self.index_key(thread_id)).await?;
        self.backend.delete(&self.latest_key(thread_id)).await?;
        self.backend.delete(&self.writes_key(thread_id)).await?;
        Ok(())
    }
}
