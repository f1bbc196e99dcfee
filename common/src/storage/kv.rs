use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::AppError;

/// Key/value cache contract used for task progress records and the FAQ-import
/// running lock. Callers don't get the value back on miss: a `None` simply
/// means absent-or-expired, it's never an error in itself.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), AppError>;
    async fn del(&self, key: &str) -> Result<(), AppError>;

    /// Atomically sets `key` only if absent (or expired); used for the
    /// `faq_import_running:{kb_id}` mutual-exclusion lock.
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, AppError>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory `KvCache`. Sufficient as the reference implementation and for
/// single-process deployments; a Redis-backed implementation is an external
/// collaborator behind the same trait.
#[derive(Clone, Default)]
pub struct InMemoryKvCache {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryKvCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for InMemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.get(key) {
            if entry.is_expired() {
                guard.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), AppError> {
        let mut guard = self.inner.lock().await;
        guard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), AppError> {
        let mut guard = self.inner.lock().await;
        guard.remove(key);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, AppError> {
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.get(key) {
            if !entry.is_expired() {
                return Ok(false);
            }
        }
        guard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let kv = InMemoryKvCache::new();
        kv.set("k", "v".into(), None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v".into()));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let kv = InMemoryKvCache::new();
        kv.set("k", "v".into(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_enforces_the_lock() {
        let kv = InMemoryKvCache::new();
        assert!(kv
            .set_if_absent("lock", "1".into(), None)
            .await
            .unwrap());
        assert!(!kv
            .set_if_absent("lock", "2".into(), None)
            .await
            .unwrap());
        kv.del("lock").await.unwrap();
        assert!(kv
            .set_if_absent("lock", "3".into(), None)
            .await
            .unwrap());
    }
}
