//! Cache backend implementations.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub mod inmemory;
pub mod redis;

pub use inmemory::InMemoryBackend;
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// Trait for cache backend implementations.
///
/// Abstracts key/value storage for the cache-aside and refresh-ahead read
/// paths. Entries are either a single string value (JSON format) or a flat
/// field map (hash format); a TTL passed on a write sets an absolute
/// expiration on the key.
///
/// **IMPORTANT:** All methods use `&self` to allow concurrent access.
/// Implementations should use interior mutability or external storage.
#[async_trait]
pub trait CacheBackend: Send + Sync + Clone {
    /// Retrieve a string value by key.
    ///
    /// # Returns
    /// - `Ok(Some(value))` - Value found in cache
    /// - `Ok(None)` - Cache miss (key not found or expired)
    ///
    /// # Errors
    /// Returns `Err` if the backend is unavailable
    async fn get_value(&self, key: &str) -> Result<Option<String>>;

    /// Store a string value with optional TTL.
    ///
    /// # Errors
    /// Returns `Err` if the backend is unavailable
    async fn put_value(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Retrieve a field map by key.
    ///
    /// # Returns
    /// - `Ok(Some(fields))` - Hash entry found
    /// - `Ok(None)` - Cache miss
    ///
    /// # Errors
    /// Returns `Err` if the backend is unavailable
    async fn get_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>>;

    /// Store a field map with optional TTL.
    ///
    /// # Errors
    /// Returns `Err` if the backend is unavailable
    async fn put_fields(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Remove an entry.
    ///
    /// # Errors
    /// Returns `Err` if the backend is unavailable
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether a key holds a live entry of either shape.
    ///
    /// # Errors
    /// Returns `Err` if the backend is unavailable
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get_value(key).await?.is_some() || self.get_fields(key).await?.is_some())
    }

    /// Health check - verify the backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if the backend is not accessible
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
