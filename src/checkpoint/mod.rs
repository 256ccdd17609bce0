//! Checkpoint persistence — pluggable snapshots of conversation state,
//! addressed by thread identity.
//!
//! Backends are interchangeable behind the [`Checkpointer`] trait:
//! [`MemoryCheckpointer`] for in-process use, [`StoreCheckpointer`] over a
//! remote store backend (single-node or clustered).

pub mod kv;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use kv::StoreCheckpointer;
pub use memory::MemoryCheckpointer;

use crate::error::Error;
use crate::event::ErrorCode;
use crate::store::{BackendKind, StoreBackend};

/// Addressing for checkpoint operations: a thread, optionally pinned to a
/// specific checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadConfig {
    pub thread_id: String,
    pub checkpoint_id: Option<String>,
}

impl ThreadConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: None,
        }
    }

    pub fn at(thread_id: impl Into<String>, checkpoint_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: Some(checkpoint_id.into()),
        }
    }
}

/// Metadata stored alongside every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safeguard_label: Option<String>,
}

/// A persisted snapshot of conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub thread_id: String,
    /// Serialized conversation state, opaque to the store.
    pub state: serde_json::Value,
    pub metadata: CheckpointMetadata,
    /// Channel versions written at this step.
    #[serde(default)]
    pub channel_versions: BTreeMap<String, u64>,
    pub created_at: DateTime<Utc>,
}

/// A write not yet attached to a finalized checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub channel: String,
    pub value: serde_json::Value,
}

/// Attribute filter for [`Checkpointer::list`]. `Some` fields must match
/// the checkpoint's metadata exactly.
#[derive(Debug, Clone, Default)]
pub struct CheckpointFilter {
    pub node: Option<String>,
    pub route: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub safeguard_label: Option<String>,
}

impl CheckpointFilter {
    pub fn matches(&self, metadata: &CheckpointMetadata) -> bool {
        fn check<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
            want.as_ref().is_none_or(|w| have.as_ref() == Some(w))
        }
        check(&self.node, &metadata.node)
            && check(&self.route, &metadata.route)
            && check(&self.error_code, &metadata.error_code)
            && check(&self.safeguard_label, &metadata.safeguard_label)
    }
}

/// Capability abstraction over checkpoint persistence.
///
/// Serialization failures surface as codec errors, connectivity failures as
/// store errors; retrying is the caller's responsibility.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist a checkpoint for the thread, refresh the "latest" pointer,
    /// and return the stored record with its assigned id.
    async fn put(
        &self,
        config: &ThreadConfig,
        state: serde_json::Value,
        metadata: CheckpointMetadata,
        new_versions: BTreeMap<String, u64>,
    ) -> Result<Checkpoint, Error>;

    /// Persist per-task writes not yet part of a finalized checkpoint.
    /// Filed under the addressed checkpoint id, or a pending bucket when
    /// none is known yet.
    async fn put_writes(
        &self,
        config: &ThreadConfig,
        writes: Vec<PendingWrite>,
        task_id: &str,
    ) -> Result<(), Error>;

    /// Read back writes stored via [`Checkpointer::put_writes`].
    async fn get_writes(
        &self,
        config: &ThreadConfig,
        task_id: &str,
    ) -> Result<Vec<PendingWrite>, Error>;

    /// Fetch the addressed checkpoint, or the latest for the thread when no
    /// id is given. Absent checkpoints read as `None`.
    async fn get(&self, config: &ThreadConfig) -> Result<Option<Checkpoint>, Error>;

    /// Checkpoints for the thread, most recent first. `before` is an
    /// exclusive upper-bound checkpoint id; each call is independent.
    async fn list(
        &self,
        config: &ThreadConfig,
        before: Option<&str>,
        limit: Option<usize>,
        filter: Option<&CheckpointFilter>,
    ) -> Result<Vec<Checkpoint>, Error>;

    /// Remove all checkpoints, writes, and the latest-pointer for a thread.
    /// Idempotent.
    async fn delete(&self, thread_id: &str) -> Result<(), Error>;
}

/// Build a checkpointer matching the configured backend kind.
pub fn build_checkpointer(
    kind: BackendKind,
    backend: Arc<dyn StoreBackend>,
    key_prefix: &str,
    ttl: Duration,
) -> Arc<dyn Checkpointer> {
    match kind {
        BackendKind::Memory => Arc::new(MemoryCheckpointer::new()),
        BackendKind::Redis | BackendKind::RedisCluster => {
            Arc::new(StoreCheckpointer::new(backend, key_prefix, ttl))
        }
    }
}

/// Bucket key for pending writes: the addressed checkpoint id, or the
/// shared pending bucket.
pub(crate) fn writes_bucket(config: &ThreadConfig, task_id: &str) -> String {
    let scope = config.checkpoint_id.as_deref().unwrap_or("pending");
    format!("{scope}/{task_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_on_some_fields_only() {
        let metadata = CheckpointMetadata {
            node: Some("answer".to_string()),
            route: Some("summary".to_string()),
            error_code: None,
            safeguard_label: None,
        };

        assert!(CheckpointFilter::default().matches(&metadata));
        assert!(
            CheckpointFilter {
                node: Some("answer".to_string()),
                ..Default::default()
            }
            .matches(&metadata)
        );
        assert!(
            !CheckpointFilter {
                node: Some("plan".to_string()),
                ..Default::default()
            }
            .matches(&metadata)
        );
        assert!(
            !CheckpointFilter {
                error_code: Some(ErrorCode::Timeout),
                ..Default::default()
            }
            .matches(&metadata)
        );
    }

    #[test]
    fn writes_bucket_prefers_checkpoint_id() {
        let pending = writes_bucket(&ThreadConfig::new("th1"), "task-1");
        assert_eq!(pending, "pending/task-1");

        let addressed = writes_bucket(&ThreadConfig::at("th1", "ckpt-9"), "task-1");
        assert_eq!(addressed, "ckpt-9/task-1");
    }
}
