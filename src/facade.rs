//! Application-visible entry point for entity operations.
//!
//! The facade translates `save`/`find_by_id`/`delete` calls into either
//! direct cache access or appended stream intents, according to the
//! entity's resolved policy:
//!
//! - `save` under Write-Behind appends an intent and returns immediately;
//!   the consumer applies it to the stores asynchronously.
//! - `find_by_id` under Cache-Aside or Refresh-Ahead reads through to the
//!   primary store on miss and populates the cache before returning.
//! - `delete` under Write-Behind appends a `DELETE` intent carrying the
//!   textual id.

use crate::backend::CacheBackend;
use crate::cache_store::CacheStore;
use crate::entity::CacheEntity;
use crate::envelope::Intent;
use crate::error::{Error, Result};
use crate::keys::stream_key;
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::policy::PolicyRegistry;
use crate::producer::IntentProducer;
use crate::repository::EntityRepository;
use std::sync::Arc;
use std::time::Instant;

/// Per-entity facade over the cache, the primary store, and the intent
/// stream.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(PolicyRegistry::new());
/// let facade = CacheFacade::<Employer, _, _, _>::new(
///     backend,
///     primary.clone(),
///     StreamProducer::new(pool),
///     registry,
/// );
///
/// facade.save(employer).await?;          // appended to the stream
/// let found = facade.find_by_id(&7).await?; // cache, then primary
/// ```
pub struct CacheFacade<E, B, R, P>
where
    E: CacheEntity,
    B: CacheBackend,
    R: EntityRepository<E>,
    P: IntentProducer,
{
    cache: CacheStore<E, B>,
    primary: Arc<R>,
    producer: P,
    registry: Arc<PolicyRegistry>,
    metrics: Box<dyn CacheMetrics>,
    stream_key: String,
}

impl<E, B, R, P> CacheFacade<E, B, R, P>
where
    E: CacheEntity,
    B: CacheBackend,
    R: EntityRepository<E>,
    P: IntentProducer,
{
    /// Build a facade for `E`.
    pub fn new(backend: B, primary: Arc<R>, producer: P, registry: Arc<PolicyRegistry>) -> Self {
        CacheFacade {
            cache: CacheStore::new(backend, &registry),
            primary,
            producer,
            registry,
            metrics: Box::new(NoOpMetrics),
            stream_key: stream_key::<E>(),
        }
    }

    /// Set a custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Save an entity.
    ///
    /// Under Write-Behind the entity is encoded and appended to the stream;
    /// the call returns as soon as the append is durable. Otherwise the
    /// entity is written synchronously to the cache store.
    ///
    /// # Errors
    /// Returns `Error::BadPayload` when the entity cannot be encoded. Store
    /// and cache failures are not surfaced here: applying the intent is the
    /// consumer's job, and a failed direct cache write is a logged no-op.
    pub async fn save(&self, entity: E) -> Result<()> {
        if self.registry.has_write_behind::<E>() {
            let json = serde_json::to_string(&entity)?;
            let entry_id = self
                .producer
                .append(&self.stream_key, &Intent::upsert(json))
                .await?;
            debug!(
                "RecordId {} added for ingestion to the stream {}",
                entry_id, self.stream_key
            );
            return Ok(());
        }

        debug!(
            "Pattern WriteBehind not enabled for entity {}",
            E::entity_name()
        );
        let key = self.cache.key_for(&entity.cache_key());
        let write_started_at = Instant::now();
        match self.cache.save(entity).await {
            Ok(_) => {
                self.metrics.record_set(&key, write_started_at.elapsed());
                Ok(())
            }
            Err(Error::BadPayload(msg)) => Err(Error::BadPayload(msg)),
            Err(e) => {
                // Cache write degrades to a no-op when the cache is down.
                warn!("Cache write skipped for {}: {}", key, e);
                self.metrics.record_error(&key, &e.to_string());
                Ok(())
            }
        }
    }

    /// Find an entity by id.
    ///
    /// Looks up the cache first. On miss, if Cache-Aside or Refresh-Ahead is
    /// enabled, reads the primary store and writes the result back to the
    /// cache before returning it.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` only when the cache lookup itself
    /// failed and the primary store failed as well. A primary failure after
    /// a clean cache miss is logged and reported as a miss.
    pub async fn find_by_id(&self, id: &E::Key) -> Result<Option<E>> {
        let key = self.cache.key_for(id);
        let lookup_started_at = Instant::now();

        let cache_failed = match self.cache.find_by_id(id).await {
            Ok(Some(entity)) => {
                self.metrics.record_hit(&key, lookup_started_at.elapsed());
                return Ok(Some(entity));
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Cache read failed for {}, falling through: {}", key, e);
                self.metrics.record_error(&key, &e.to_string());
                true
            }
        };
        self.metrics.record_miss(&key, lookup_started_at.elapsed());

        if !self.registry.has_cache_aside::<E>() && !self.registry.has_refresh_ahead::<E>() {
            debug!(
                "Pattern CacheAside not enabled for entity {}",
                E::entity_name()
            );
            return Ok(None);
        }

        match self.primary.find_by_id(id).await {
            Ok(Some(entity)) => {
                debug!("Entity read from primary store: {}", key);
                Ok(Some(self.write_back(entity).await))
            }
            Ok(None) => {
                debug!("Entity not found in primary store: {}", key);
                Ok(None)
            }
            Err(e) if cache_failed => {
                Err(Error::StoreUnavailable(format!(
                    "cache and primary store both failed for {}: {}",
                    key, e
                )))
            }
            Err(e) => {
                warn!("Primary read failed for {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Force a primary read and cache refill, regardless of cache state.
    ///
    /// This is the cache-aside refill used by the refresh-ahead listener.
    ///
    /// # Errors
    /// Returns `Error::StoreUnavailable` when the primary store fails.
    pub async fn reload_by_id(&self, id: &E::Key) -> Result<Option<E>> {
        match self.primary.find_by_id(id).await? {
            Some(entity) => Ok(Some(self.write_back(entity).await)),
            None => {
                debug!("Entity not found in primary store: {}", self.cache.key_for(id));
                Ok(None)
            }
        }
    }

    /// Delete an entity by id.
    ///
    /// Under Write-Behind a `DELETE` intent carrying the textual id is
    /// appended; otherwise the entry is removed from the cache store.
    ///
    /// # Errors
    /// Returns `Err` if the stream append (or, without Write-Behind, the
    /// cache delete) fails.
    pub async fn delete(&self, id: &E::Key) -> Result<()> {
        if self.registry.has_write_behind::<E>() {
            let entry_id = self
                .producer
                .append(&self.stream_key, &Intent::delete(id.to_string()))
                .await?;
            debug!(
                "RecordId {} added for deletion to the stream {}",
                entry_id, self.stream_key
            );
            return Ok(());
        }

        debug!(
            "Pattern WriteBehind not enabled for entity {}",
            E::entity_name()
        );
        let key = self.cache.key_for(id);
        let delete_started_at = Instant::now();
        self.cache.delete_by_id(id).await?;
        self.metrics.record_delete(&key, delete_started_at.elapsed());
        Ok(())
    }

    /// The cache store adapter backing this facade.
    pub fn cache(&self) -> &CacheStore<E, B> {
        &self.cache
    }

    /// The primary store backing this facade's read path.
    pub fn primary(&self) -> &Arc<R> {
        &self.primary
    }

    async fn write_back(&self, entity: E) -> E {
        match self.cache.save(entity.clone()).await {
            Ok(saved) => saved,
            Err(e) => {
                // The read still succeeds when the write-back cannot land.
                warn!(
                    "Cache write-back skipped for {}: {}",
                    self.cache.key_for(&entity.cache_key()),
                    e
                );
                entity
            }
        }
    }
}
