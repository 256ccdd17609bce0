//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::store::BackendKind;

/// Default TTL on a job's event log after its `done` event.
pub const DEFAULT_DONE_TTL: Duration = Duration::from_secs(3600);
/// Default TTL on a cancel flag.
pub const DEFAULT_CANCEL_TTL: Duration = Duration::from_secs(1800);
/// Default TTL on checkpoint records.
pub const DEFAULT_CHECKPOINT_TTL: Duration = Duration::from_secs(86_400);
/// Default queue/stream poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default upper bound on worker backoff.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Backing store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub redis_url: Option<String>,
    pub cluster_nodes: Vec<String>,
    pub checkpoint_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            redis_url: None,
            cluster_nodes: Vec::new(),
            checkpoint_ttl: DEFAULT_CHECKPOINT_TTL,
        }
    }
}

/// Key layout and retention for the shared queue structures.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// FIFO channel of pending job payloads.
    pub pending_key: String,
    /// Prefix for per-job event log keys (`{prefix}:{job_id}`).
    pub stream_prefix: String,
    /// Prefix for status record keys.
    pub status_prefix: String,
    /// Prefix for cancel flag keys.
    pub cancel_prefix: String,
    /// Prefix for checkpoint keys.
    pub checkpoint_prefix: String,
    pub done_ttl: Duration,
    pub cancel_ttl: Duration,
}

impl QueueConfig {
    /// Derive the full key layout from one namespace prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            pending_key: format!("{prefix}:pending"),
            stream_prefix: format!("{prefix}:stream"),
            status_prefix: format!("{prefix}:status"),
            cancel_prefix: format!("{prefix}:cancel"),
            checkpoint_prefix: format!("{prefix}:ckpt"),
            done_ttl: DEFAULT_DONE_TTL,
            cancel_ttl: DEFAULT_CANCEL_TTL,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::with_prefix("jobs")
    }
}

/// Worker loop tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Orchestration service tuning.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Interval between empty polls while streaming events to a client.
    pub stream_poll_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            stream_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub service: ServiceConfig,
}

impl PipelineConfig {
    /// Read configuration from `JOBSTREAM_*` / `REDIS_*` environment
    /// variables, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match std::env::var("JOBSTREAM_BACKEND") {
            Ok(value) => value.parse::<BackendKind>()?,
            Err(_) => BackendKind::Memory,
        };

        let cluster_nodes = std::env::var("REDIS_CLUSTER_NODES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let prefix =
            std::env::var("JOBSTREAM_KEY_PREFIX").unwrap_or_else(|_| "jobs".to_string());
        let mut queue = QueueConfig::with_prefix(&prefix);
        queue.done_ttl = env_secs("JOBSTREAM_DONE_TTL_SECS", DEFAULT_DONE_TTL)?;
        queue.cancel_ttl = env_secs("JOBSTREAM_CANCEL_TTL_SECS", DEFAULT_CANCEL_TTL)?;

        let poll_interval = env_millis("JOBSTREAM_POLL_MS", DEFAULT_POLL_INTERVAL)?;

        Ok(Self {
            store: StoreConfig {
                backend,
                redis_url: std::env::var("REDIS_URL").ok(),
                cluster_nodes,
                checkpoint_ttl: env_secs("JOBSTREAM_CHECKPOINT_TTL_SECS", DEFAULT_CHECKPOINT_TTL)?,
            },
            queue,
            worker: WorkerConfig {
                poll_interval,
                max_backoff: env_millis("JOBSTREAM_MAX_BACKOFF_MS", DEFAULT_MAX_BACKOFF)?,
            },
            service: ServiceConfig {
                stream_poll_interval: env_millis("JOBSTREAM_STREAM_POLL_MS", poll_interval)?,
            },
        })
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_u64(key)?.map_or(Ok(default), |v| Ok(Duration::from_secs(v)))
}

fn env_millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_u64(key)?.map_or(Ok(default), |v| Ok(Duration::from_millis(v)))
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_config_derives_key_layout() {
        let queue = QueueConfig::with_prefix("chat");
        assert_eq!(queue.pending_key, "chat:pending");
        assert_eq!(queue.stream_prefix, "chat:stream");
        assert_eq!(queue.status_prefix, "chat:status");
        assert_eq!(queue.cancel_prefix, "chat:cancel");
        assert_eq!(queue.checkpoint_prefix, "chat:ckpt");
    }

    #[test]
    fn defaults_are_sane() {
        let config = PipelineConfig::default();
        assert_eq!(config.store.backend, BackendKind::Memory);
        assert_eq!(config.queue.done_ttl, DEFAULT_DONE_TTL);
        assert_eq!(config.worker.poll_interval, DEFAULT_POLL_INTERVAL);
    }
}
