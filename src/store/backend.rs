//! Backend capability trait and backend-kind registry.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConfigError, StoreError};

/// Which backing store the pipeline runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Process-local, non-persistent. Single process only.
    Memory,
    /// Single-node remote store.
    Redis,
    /// Clustered remote store.
    RedisCluster,
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "redis-cluster" | "cluster" => Ok(Self::RedisCluster),
            other => Err(ConfigError::InvalidValue {
                key: "backend".to_string(),
                message: format!("unknown backend kind: {other}"),
            }),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
            Self::RedisCluster => "redis-cluster",
        };
        write!(f, "{s}")
    }
}

/// Primitive operations the pipeline needs from its shared store.
///
/// Each operation is atomic for a single key; there is no cross-call
/// transaction. `pop_front` in particular must hand each element to exactly
/// one caller. Connectivity failures surface as [`StoreError::Unavailable`]
/// and are the caller's responsibility to retry.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Append to the tail of the list at `key`; returns the new length.
    async fn push_back(&self, key: &str, value: &str) -> Result<u64, StoreError>;

    /// Remove and return the head of the list at `key`, if any.
    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Return the tail element of the list at `key` without consuming it.
    async fn peek_back(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Return the full contents of the list at `key` in append order.
    async fn list_all(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Attach a time-to-live to `key`. A no-op for absent keys.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Set the value at `key`, optionally with a time-to-live.
    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Read the value at `key`, if any.
    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove `key` entirely. Idempotent.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
