//! In-memory cache backend (default for tests, thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding.
//! Handles TTL expiration on access. Keyspace expiration notifications are
//! not emitted; refresh-ahead requires the Redis backend.

use super::CacheBackend;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

#[derive(Clone)]
enum StoredValue {
    Text(String),
    Fields(HashMap<String, String>),
}

struct CacheEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: StoredValue, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        CacheEntry { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// Thread-safe async in-memory cache backend.
///
/// # Example
///
/// ```no_run
/// use cacheflow::backend::{CacheBackend, InMemoryBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.put_value("key1", "value".to_string(), None).await?;
///     assert!(backend.get_value("key1").await?.is_some());
///
///     // Store with TTL
///     backend
///         .put_value("key2", "expires".to_string(), Some(Duration::from_secs(300)))
///         .await?;
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryBackend {
    /// Create a new in-memory cache backend.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
        }
    }

    /// Current number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.store.clear();
    }

    fn live_entry(&self, key: &str) -> Option<StoredValue> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                return Some(entry.value.clone());
            }
        }
        // Expired on access.
        self.store.remove(key);
        None
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        match self.live_entry(key) {
            Some(StoredValue::Text(value)) => {
                debug!("InMemory GET {} -> HIT", key);
                Ok(Some(value))
            }
            _ => {
                debug!("InMemory GET {} -> MISS", key);
                Ok(None)
            }
        }
    }

    async fn put_value(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(StoredValue::Text(value), ttl);
        self.store.insert(key.to_string(), entry);

        if let Some(d) = ttl {
            debug!("InMemory SET {} (TTL: {:?})", key, d);
        } else {
            debug!("InMemory SET {}", key);
        }

        Ok(())
    }

    async fn get_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        match self.live_entry(key) {
            Some(StoredValue::Fields(fields)) => {
                debug!("InMemory HGETALL {} -> HIT", key);
                Ok(Some(fields))
            }
            _ => {
                debug!("InMemory HGETALL {} -> MISS", key);
                Ok(None)
            }
        }
    }

    async fn put_fields(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let entry = CacheEntry::new(StoredValue::Fields(fields), ttl);
        self.store.insert(key.to_string(), entry);
        debug!("InMemory HSET {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        debug!("InMemory DELETE {}", key);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_set_get() {
        let backend = InMemoryBackend::new();

        backend
            .put_value("key1", "value1".to_string(), None)
            .await
            .expect("Failed to set");

        let result = backend.get_value("key1").await.expect("Failed to get");
        assert_eq!(result, Some("value1".to_string()));
    }

    #[tokio::test]
    async fn test_inmemory_miss() {
        let backend = InMemoryBackend::new();

        let result = backend
            .get_value("nonexistent")
            .await
            .expect("Failed to get");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_inmemory_delete() {
        let backend = InMemoryBackend::new();

        backend
            .put_value("key1", "value1".to_string(), None)
            .await
            .expect("Failed to set");
        assert!(backend.exists("key1").await.expect("Failed to check"));

        backend.delete("key1").await.expect("Failed to delete");
        assert!(!backend.exists("key1").await.expect("Failed to check"));
    }

    #[tokio::test]
    async fn test_inmemory_ttl_expiration() {
        let backend = InMemoryBackend::new();

        backend
            .put_value(
                "key1",
                "value1".to_string(),
                Some(Duration::from_millis(100)),
            )
            .await
            .expect("Failed to set");

        assert!(backend
            .get_value("key1")
            .await
            .expect("Failed to get")
            .is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(backend
            .get_value("key1")
            .await
            .expect("Failed to get")
            .is_none());
    }

    #[tokio::test]
    async fn test_inmemory_fields_round_trip() {
        let backend = InMemoryBackend::new();

        let mut fields = HashMap::new();
        fields.insert("id".to_string(), "1".to_string());
        fields.insert("name".to_string(), "A".to_string());

        backend
            .put_fields("hash1", fields.clone(), None)
            .await
            .expect("Failed to hset");

        let result = backend
            .get_fields("hash1")
            .await
            .expect("Failed to hgetall");
        assert_eq!(result, Some(fields));
    }

    #[tokio::test]
    async fn test_inmemory_shape_mismatch_is_miss() {
        let backend = InMemoryBackend::new();

        backend
            .put_value("key1", "text".to_string(), None)
            .await
            .expect("Failed to set");

        // Reading a text entry as a hash is a miss, not an error.
        assert!(backend
            .get_fields("key1")
            .await
            .expect("Failed to hgetall")
            .is_none());
    }

    #[tokio::test]
    async fn test_inmemory_clear() {
        let backend = InMemoryBackend::new();

        backend
            .put_value("key1", "v".to_string(), None)
            .await
            .expect("Failed to set");
        backend
            .put_value("key2", "v".to_string(), None)
            .await
            .expect("Failed to set");

        assert_eq!(backend.len(), 2);
        backend.clear();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_inmemory_clone_shares_store() {
        let backend1 = InMemoryBackend::new();
        backend1
            .put_value("key", "value".to_string(), None)
            .await
            .expect("Failed to set");

        let backend2 = backend1.clone();
        assert_eq!(
            backend2.get_value("key").await.expect("Failed to get"),
            Some("value".to_string())
        );
    }
}
