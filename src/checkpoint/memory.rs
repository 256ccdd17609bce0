//! In-process checkpointer.
//!
//! Non-persistent and single-process only. Mirrors the remote backends'
//! contract without TTLs; state disappears with the process.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::Error;
use crate::job::prefixed_id;

use super::{
    Checkpoint, CheckpointFilter, CheckpointMetadata, Checkpointer, PendingWrite, ThreadConfig,
    writes_bucket,
};

#[derive(Default)]
struct ThreadSlot {
    /// Checkpoints in append order; the tail is the latest.
    checkpoints: Vec<Checkpoint>,
    /// Pending writes keyed by `{checkpoint|pending}/{task_id}`.
    writes: HashMap<String, Vec<PendingWrite>>,
}

/// Process-local [`Checkpointer`].
#[derive(Default)]
pub struct MemoryCheckpointer {
    threads: RwLock<HashMap<String, ThreadSlot>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
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
        let mut threads = self.threads.write().await;
        threads
            .entry(config.thread_id.clone())
            .or_default()
            .checkpoints
            .push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn put_writes(
        &self,
        config: &ThreadConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
    ) -> Result<(), Error> {
        let mut threads = self.threads.write().await;
        threads
            .entry(config.thread_id.clone())
            .or_default()
            .writes
            .insert(writes_bucket(config, task_id), writes);
        Ok(())
    }

    async fn get_writes(
        &self,
        config: &ThreadConfig,
        task_id: &str,
    ) -> Result<Vec<PendingWrite>, Error> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(&config.thread_id)
            .and_then(|slot| slot.writes.get(&writes_bucket(config, task_id)))
            .cloned()
            .unwrap_or_default())
    }

    async fn get(&self, config: &ThreadConfig) -> Result<Option<Checkpoint>, Error> {
        let threads = self.threads.read().await;
        let Some(slot) = threads.get(&config.thread_id) else {
            return Ok(None);
        };
        let found = match &config.checkpoint_id {
            Some(id) => slot.checkpoints.iter().find(|c| &c.checkpoint_id == id),
            None => slot.checkpoints.last(),
        };
        Ok(found.cloned())
    }

    async fn list(
        &self,
        config: &ThreadConfig,
        before: Option<&str>,
        limit: Option<usize>,
        filter: Option<&CheckpointFilter>,
    ) -> Result<Vec<Checkpoint>, Error> {
        let threads = self.threads.read().await;
        let Some(slot) = threads.get(&config.thread_id) else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        let mut past_cursor = before.is_none();
        for checkpoint in slot.checkpoints.iter().rev() {
            if !past_cursor {
                past_cursor = Some(checkpoint.checkpoint_id.as_str()) == before;
                continue;
            }
            if filter.is_some_and(|f| !f.matches(&checkpoint.metadata)) {
                continue;
            }
            results.push(checkpoint.clone());
            if limit.is_some_and(|l| results.len() >= l) {
                break;
            }
        }
        Ok(results)
    }

    async fn delete(&self, thread_id: &str) -> Result<(), Error> {
        self.threads.write().await.remove(thread_id);
        Ok(())
    }
}
