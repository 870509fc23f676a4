//! Primary store adapter trait for the store of record.
//!
//! The `EntityRepository` trait decouples cacheflow from specific database
//! implementations. The write-behind processor fans out saves and deletes to
//! every repository bound to an entity stream; the facade reads through the
//! first bound repository on cache miss.
//!
//! # Implementing EntityRepository
//!
//! Implement this trait for any storage backend:
//! - SQL databases: SQLx, tokio-postgres, Diesel
//! - NoSQL: MongoDB, DynamoDB
//! - In-memory: for testing (provided in this module)
//!
//! # Idempotence requirement
//!
//! The stream delivers intents at least once. `save` must behave as "upsert
//! by id" and `delete_by_id` as "delete if exists" so that duplicate and
//! out-of-order re-deliveries converge.
//!
//! # Error Handling
//!
//! Return `Err(Error::StoreUnavailable)` for connectivity issues, timeouts,
//! and any other storage failure; pending entries are retried by the reaper
//! and dead-lettered after the attempt limit.

use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Trait for primary store (store of record) implementations.
///
/// `STORE_NAME` identifies the store in consumer-group and consumer names
/// (`<store>_group`, `<entity>_<store>_consumer`); keep it stable while
/// streams are live.
#[async_trait]
pub trait EntityRepository<E: CacheEntity>: Send + Sync {
    /// Stable name of this store, used for group and consumer naming.
    const STORE_NAME: &'static str;

    /// Fetch an entity by id.
    ///
    /// # Returns
    /// - `Ok(Some(entity))` - Entity found
    /// - `Ok(None)` - Entity not found (not an error)
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the fetch fails
    async fn find_by_id(&self, id: &E::Key) -> Result<Option<E>>;

    /// Upsert an entity by id.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the write fails
    async fn save(&self, entity: E) -> Result<E>;

    /// Delete an entity by id; deleting an absent id is not an error.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the delete fails
    async fn delete_by_id(&self, id: &E::Key) -> Result<()>;
}

// ============================================================================
// In-Memory Test Repository
// ============================================================================

/// Simple in-memory repository for testing cacheflow pipelines.
///
/// Entities are held in a concurrent map keyed by the textual id. Transient
/// store failures can be injected with [`fail_times`](Self::fail_times) to
/// exercise the reaper's retry and dead-letter paths.
///
/// # Example
///
/// ```ignore
/// let repo = InMemoryRepository::<Employer>::new();
/// repo.fail_times(2); // next two operations return StoreUnavailable
/// ```
#[derive(Clone)]
pub struct InMemoryRepository<E: CacheEntity> {
    data: Arc<DashMap<String, E>>,
    failures: Arc<AtomicU32>,
}

impl<E: CacheEntity> InMemoryRepository<E> {
    /// Create a new empty in-memory repository.
    pub fn new() -> Self {
        InMemoryRepository {
            data: Arc::new(DashMap::new()),
            failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Insert an entity directly, bypassing failure injection.
    pub fn insert(&self, entity: E) {
        self.data.insert(entity.cache_key().to_string(), entity);
    }

    /// Make the next `n` operations fail with `StoreUnavailable`.
    pub fn fail_times(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remove all entities and reset failure injection.
    pub fn clear(&self) {
        self.data.clear();
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Fetch without going through the async trait; test convenience.
    pub fn get(&self, id: &E::Key) -> Option<E> {
        self.data.get(&id.to_string()).map(|e| e.value().clone())
    }

    /// Snapshot of all stored entities; test convenience.
    pub fn entities(&self) -> Vec<E> {
        self.data.iter().map(|e| e.value().clone()).collect()
    }

    fn check_failure(&self) -> Result<()> {
        let remaining = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            Err(Error::StoreUnavailable(
                "injected failure (in-memory repository)".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl<E: CacheEntity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: CacheEntity> EntityRepository<E> for InMemoryRepository<E> {
    const STORE_NAME: &'static str = "memory";

    async fn find_by_id(&self, id: &E::Key) -> Result<Option<E>> {
        self.check_failure()?;
        Ok(self.data.get(&id.to_string()).map(|e| e.value().clone()))
    }

    async fn save(&self, entity: E) -> Result<E> {
        self.check_failure()?;
        self.data
            .insert(entity.cache_key().to_string(), entity.clone());
        Ok(entity)
    }

    async fn delete_by_id(&self, id: &E::Key) -> Result<()> {
        self.check_failure()?;
        self.data.remove(&id.to_string());
        Ok(())
    }
}
