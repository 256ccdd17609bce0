//! Shared store layer — list and key-value primitives over interchangeable
//! backends.
//!
//! Every shared structure in the pipeline (job queue, per-job event logs,
//! status records, cancel flags, checkpoints) is driven through the
//! [`StoreBackend`] trait. Backends are selected at configuration time via
//! [`BackendKind`]; there is no runtime discovery.

pub mod backend;
pub mod cluster;
pub mod memory;
pub mod redis;

use std::sync::Arc;

pub use backend::{BackendKind, StoreBackend};
pub use cluster::ClusterBackend;
pub use memory::MemoryBackend;
pub use redis::RedisBackend;

use crate::config::StoreConfig;
use crate::error::{ConfigError, Error};

/// Build the configured store backend.
pub async fn connect_backend(config: &StoreConfig) -> Result<Arc<dyn StoreBackend>, Error> {
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendKind::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: "REDIS_URL".to_string(),
                    hint: "required for the redis backend".to_string(),
                })?;
            Ok(Arc::new(RedisBackend::connect(url).await?))
        }
        BackendKind::RedisCluster => {
            if config.cluster_nodes.is_empty() {
                return Err(ConfigError::MissingRequired {
                    key: "REDIS_CLUSTER_NODES".to_string(),
                    hint: "comma-separated node URLs required for the cluster backend".to_string(),
                }
                .into());
            }
            Ok(Arc::new(
                ClusterBackend::connect(&config.cluster_nodes).await?,
            ))
        }
    }
}
