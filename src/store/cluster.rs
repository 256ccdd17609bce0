//! Clustered Redis store backend.
//!
//! Same operation set as the single-node backend, routed through the
//! cluster-aware connection. Keys used by the pipeline are independent, so
//! slot distribution across nodes needs no special handling here. The
//! "latest" pointer contract (read-after-write on the writer's own
//! connection) is preserved by the cluster client routing reads for a key
//! to that key's master node.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;

use crate::error::StoreError;

use super::backend::StoreBackend;
use super::redis::map_redis_err;

/// [`StoreBackend`] over a Redis cluster.
#[derive(Clone)]
pub struct ClusterBackend {
    conn: ClusterConnection,
}

impl ClusterBackend {
    /// Connect to a cluster given its seed node URLs.
    pub async fn connect(nodes: &[String]) -> Result<Self, StoreError> {
        let client = ClusterClient::new(nodes.to_vec())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StoreBackend for ClusterBackend {
    async fn push_back(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush(key, value).await.map_err(map_redis_err)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.lpop(key, None).await.map_err(map_redis_err)
    }

    async fn peek_back(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.lindex(key, -1).await.map_err(map_redis_err)
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.lrange(key, 0, -1).await.map_err(map_redis_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: bool = conn
            .expire(key, ttl.as_secs() as i64)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(map_redis_err),
            None => conn.set(key, value).await.map_err(map_redis_err),
        }
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_redis_err)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.del(key).await.map_err(map_redis_err)?;
        Ok(())
    }
}
