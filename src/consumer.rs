//! Stream consumer: group bootstrap and the long-running poll loop.
//!
//! One consumer exists per `(entity, store)` pair. Startup is idempotent: a
//! pre-existing group is tolerated, and a missing stream is seeded with an
//! `{init:"true"}` marker so the group can be created at the last-consumed
//! offset. Delivery is cooperative: a batch is fully dispatched before the
//! next poll.

use crate::config::StreamConfig;
use crate::entity::CacheEntity;
use crate::envelope::StreamEntry;
use crate::error::{Error, Result};
use crate::keys::{consumer_name, stream_key};
use crate::processor::Processor;
use crate::repository::EntityRepository;
use deadpool_redis::{
    redis::{
        streams::{StreamReadOptions, StreamReadReply},
        AsyncCommands, RedisError,
    },
    Pool,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The server rejects XGROUP CREATE with BUSYGROUP when the group exists.
pub(crate) fn is_busy_group(e: &RedisError) -> bool {
    e.to_string().contains("BUSYGROUP")
}

/// The server rejects XGROUP CREATE when the stream itself is missing.
pub(crate) fn is_missing_stream(e: &RedisError) -> bool {
    let text = e.to_string();
    text.contains("NOGROUP") || text.contains("requires the key to exist")
}

/// Convert a raw stream id into the crate's entry representation.
///
/// Non-string field values are dropped; the envelope is a flat string map
/// by contract.
pub(crate) fn entry_from_stream_id(
    stream_key: &str,
    sid: &deadpool_redis::redis::streams::StreamId,
) -> StreamEntry {
    let mut entry = StreamEntry::new(stream_key, sid.id.clone());
    for key in sid.map.keys() {
        if let Some(value) = sid.get::<String>(key) {
            entry.fields.insert(key.clone(), value);
        }
    }
    entry
}

/// Long-running reader for one `(entity, store)` consumer group.
pub struct StreamConsumer<E, R>
where
    E: CacheEntity,
    R: EntityRepository<E>,
{
    pool: Pool,
    processor: Arc<Processor<E, R>>,
    config: StreamConfig,
    stream_key: String,
    group: String,
    consumer: String,
}

impl<E, R> StreamConsumer<E, R>
where
    E: CacheEntity,
    R: EntityRepository<E> + 'static,
{
    /// Create a consumer bound to the entity's stream and the store's group.
    pub fn new(pool: Pool, processor: Arc<Processor<E, R>>, config: StreamConfig) -> Self {
        let group = processor.group().to_string();
        StreamConsumer {
            pool,
            processor,
            config,
            stream_key: stream_key::<E>(),
            group,
            consumer: consumer_name::<E>(R::STORE_NAME),
        }
    }

    /// Stream key this consumer reads.
    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Consumer name within the group.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Idempotently create the consumer group, bootstrapping the stream if
    /// necessary.
    ///
    /// # Errors
    /// Returns `Error::BackendError` for any server failure other than the
    /// tolerated BUSYGROUP.
    pub async fn ensure_group(&self) -> Result<()> {
        info!(
            "Starting to listen on stream {} for entity {} managed by store {}",
            self.stream_key,
            E::entity_name(),
            R::STORE_NAME
        );
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Redis connection: {}", e))
        })?;

        match conn
            .xgroup_create::<_, _, _, String>(&self.stream_key, &self.group, "0")
            .await
        {
            Ok(_) => {
                info!(
                    "Consumer group {} created for stream {}",
                    self.group, self.stream_key
                );
                Ok(())
            }
            Err(e) if is_busy_group(&e) => {
                debug!(
                    "Consumer group {} already exists for stream {}",
                    self.group, self.stream_key
                );
                Ok(())
            }
            Err(e) if is_missing_stream(&e) => {
                conn.xadd_map::<_, _, _, String>(
                    &self.stream_key,
                    "*",
                    &[("init".to_string(), "true".to_string())][..],
                )
                .await
                .map_err(|e| {
                    Error::BackendError(format!(
                        "Failed to bootstrap stream {}: {}",
                        self.stream_key, e
                    ))
                })?;

                conn.xgroup_create::<_, _, _, String>(&self.stream_key, &self.group, "$")
                    .await
                    .map_err(|e| {
                        Error::BackendError(format!(
                            "Failed to create group {} on {}: {}",
                            self.group, self.stream_key, e
                        ))
                    })?;
                info!(
                    "Stream {} and consumer group {} created",
                    self.stream_key, self.group
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Spawn the poll loop; it stops when `shutdown` flips to `true`.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Listener started for stream {} consumer {}",
            self.stream_key, self.consumer
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let batch = tokio::select! {
                _ = shutdown.changed() => break,
                batch = self.read_batch() => batch,
            };
            match batch {
                Ok(entries) => {
                    // Cooperative delivery: the whole batch is dispatched
                    // before the next poll.
                    for entry in entries {
                        if let Err(e) = self.processor.orchestrate(&entry).await {
                            error!("Error processing entry {}: {}", entry.id, e);
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "Stream read failed on {} for consumer {}: {}",
                        self.stream_key, self.consumer, e
                    );
                    tokio::time::sleep(self.config.poll_timeout).await;
                }
            }
        }
        info!(
            "Listener stopped for stream {} consumer {}",
            self.stream_key, self.consumer
        );
    }

    async fn read_batch(&self) -> Result<Vec<StreamEntry>> {
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Redis connection: {}", e))
        })?;

        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.config.batch_size)
            .block(self.config.poll_timeout.as_millis() as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &options)
            .await
            .map_err(|e| {
                Error::BackendError(format!(
                    "XREADGROUP failed on {} for group {}: {}",
                    self.stream_key, self.group, e
                ))
            })?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for sid in &key.ids {
                entries.push(entry_from_stream_id(&self.stream_key, sid));
            }
        }
        Ok(entries)
    }
}
