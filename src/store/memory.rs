//! In-process store backend.
//!
//! Non-persistent and single-process only; intended for tests and for
//! running the pipeline without external infrastructure. TTLs are tracked
//! as deadlines and enforced lazily on access.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

use super::backend::StoreBackend;

#[derive(Default)]
struct Shelf {
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, String>,
    deadlines: HashMap<String, Instant>,
}

impl Shelf {
    /// Drop `key` if its deadline has passed.
    fn evict_expired(&mut self, key: &str) {
        if let Some(&deadline) = self.deadlines.get(key) {
            if Instant::now() >= deadline {
                self.lists.remove(key);
                self.values.remove(key);
                self.deadlines.remove(key);
            }
        }
    }
}

/// Process-local [`StoreBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Shelf>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn push_back(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut shelf = self.inner.write().await;
        shelf.evict_expired(key);
        let list = shelf.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len() as u64)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut shelf = self.inner.write().await;
        shelf.evict_expired(key);
        Ok(shelf.lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn peek_back(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut shelf = self.inner.write().await;
        shelf.evict_expired(key);
        Ok(shelf.lists.get(key).and_then(|l| l.back().cloned()))
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut shelf = self.inner.write().await;
        shelf.evict_expired(key);
        Ok(shelf
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut shelf = self.inner.write().await;
        shelf.evict_expired(key);
        if shelf.lists.contains_key(key) || shelf.values.contains_key(key) {
            shelf.deadlines.insert(key.to_string(), Instant::now() + ttl);
        }
        Ok(())
    }

    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut shelf = self.inner.write().await;
        shelf.values.insert(key.to_string(), value.to_string());
        match ttl {
            Some(ttl) => {
                shelf.deadlines.insert(key.to_string(), Instant::now() + ttl);
            }
            None => {
                shelf.deadlines.remove(key);
            }
        }
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut shelf = self.inner.write().await;
        shelf.evict_expired(key);
        Ok(shelf.values.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut shelf = self.inner.write().await;
        shelf.lists.remove(key);
        shelf.values.remove(key);
        shelf.deadlines.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_fifo() {
        let store = MemoryBackend::new();
        assert_eq!(store.push_back("k", "a").await.unwrap(), 1);
        assert_eq!(store.push_back("k", "b").await.unwrap(), 2);

        assert_eq!(store.pop_front("k").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop_front("k").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop_front("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn peek_back_does_not_consume() {
        let store = MemoryBackend::new();
        store.push_back("k", "a").await.unwrap();
        store.push_back("k", "b").await.unwrap();

        assert_eq!(store.peek_back("k").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.list_all("k").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn expired_lists_are_reclaimed() {
        let store = MemoryBackend::new();
        store.push_back("k", "a").await.unwrap();
        store.expire("k", Duration::from_millis(5)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.pop_front("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_on_absent_key_is_noop() {
        let store = MemoryBackend::new();
        store.expire("missing", Duration::from_secs(1)).await.unwrap();
        store.push_back("missing", "a").await.unwrap();

        // the earlier expire must not apply to the fresh list
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.pop_front("missing").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn values_honor_ttl() {
        let store = MemoryBackend::new();
        store
            .set_value("flag", "1", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        assert_eq!(store.get_value("flag").await.unwrap().as_deref(), Some("1"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get_value("flag").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_without_ttl_clears_previous_deadline() {
        let store = MemoryBackend::new();
        store
            .set_value("flag", "1", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        store.set_value("flag", "2", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get_value("flag").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryBackend::new();
        store.push_back("k", "a").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.pop_front("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_pops_deliver_each_element_once() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let store = Arc::new(MemoryBackend::new());
        for i in 0..50 {
            store.push_back("k", &i.to_string()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(v) = store.pop_front("k").await.unwrap() {
                    seen.push(v);
                }
                seen
            }));
        }

        let mut all = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for v in handle.await.unwrap() {
                total += 1;
                assert!(all.insert(v), "element delivered twice");
            }
        }
        assert_eq!(total, 50);
    }
}
