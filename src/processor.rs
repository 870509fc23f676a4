//! Processor: applies stream intents to the bound stores and acknowledges
//! them.
//!
//! One processor exists per `(entity, store)` consumer group. `process`
//! decodes an entry and fans the operation out to every bound store
//! instance, attempting all of them before reporting an aggregate failure;
//! `acknowledge` issues the group acknowledge. `orchestrate` chains the two,
//! which is the live delivery path.

use crate::entity::CacheEntity;
use crate::envelope::{Operation, StreamEntry};
use crate::error::{Error, Result};
use crate::keys::consumer_group;
use crate::repository::EntityRepository;
use deadpool_redis::{redis::AsyncCommands, Pool};
use std::marker::PhantomData;
use std::sync::Arc;

/// Applies decoded intents to the stores bound to one consumer group.
pub struct Processor<E, R>
where
    E: CacheEntity,
    R: EntityRepository<E>,
{
    pool: Pool,
    stores: Vec<Arc<R>>,
    group: String,
    _entity: PhantomData<E>,
}

impl<E, R> Processor<E, R>
where
    E: CacheEntity,
    R: EntityRepository<E>,
{
    /// Create a processor fanning out to the given store instances.
    pub fn new(pool: Pool, stores: Vec<Arc<R>>) -> Self {
        Processor {
            pool,
            stores,
            group: consumer_group(R::STORE_NAME),
            _entity: PhantomData,
        }
    }

    /// Consumer group this processor acknowledges against.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Apply an entry to every bound store.
    ///
    /// Entries without a `content` field (the stream bootstrap marker) are
    /// skipped. For `DELETE`, the content is parsed as the entity's id type;
    /// anything else is decoded as the entity itself and upserted.
    ///
    /// # Errors
    /// - `Error::BadPayload` - undecodable content, unparseable id, or
    ///   unknown operation; fatal for the entry
    /// - `Error::ProcessMessage` - one or more stores failed; every store
    ///   was attempted first
    pub async fn process(&self, entry: &StreamEntry) -> Result<()> {
        entry.dump();
        let Some(content) = entry.content() else {
            debug!("Skipping entry {} without content", entry.id);
            return Ok(());
        };
        let operation = entry.operation()?;
        debug!("Processing entry: {}", entry.id);

        let mut failures: Vec<String> = Vec::new();
        match operation {
            Some(Operation::Delete) => {
                let id: E::Key = content.parse().map_err(|_| {
                    Error::BadPayload(format!(
                        "cannot parse id {:?} for entity {}",
                        content,
                        E::entity_name()
                    ))
                })?;
                for store in &self.stores {
                    trace!("Deleting entry: {}", entry.id);
                    if let Err(e) = store.delete_by_id(&id).await {
                        error!("Error processing entry {}: {}", entry.id, e);
                        failures.push(e.to_string());
                    }
                }
            }
            _ => {
                let entity: E = serde_json::from_str(content).map_err(|e| {
                    Error::BadPayload(format!(
                        "cannot decode {} from entry {}: {}",
                        E::entity_name(),
                        entry.id,
                        e
                    ))
                })?;
                for store in &self.stores {
                    trace!("Saving entry: {}", entry.id);
                    if let Err(e) = store.save(entity.clone()).await {
                        error!("Error processing entry {}: {}", entry.id, e);
                        failures.push(e.to_string());
                    }
                }
            }
        }

        if failures.is_empty() {
            info!("Processed entry: {}", entry.id);
            Ok(())
        } else {
            Err(Error::ProcessMessage(failures.join("; ")))
        }
    }

    /// Acknowledge an entry in this processor's group.
    ///
    /// # Errors
    /// Returns `Error::AcknowledgeMessage` when the acknowledge fails; the
    /// entry stays pending and is re-driven by the reaper.
    pub async fn acknowledge(&self, entry: &StreamEntry) -> Result<()> {
        debug!("Acknowledging entry: {}", entry.id);
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::AcknowledgeMessage(format!("Failed to get Redis connection: {}", e))
        })?;

        conn.xack::<_, _, _, i64>(&entry.stream_key, &self.group, &[&entry.id])
            .await
            .map_err(|e| {
                Error::AcknowledgeMessage(format!(
                    "XACK failed for entry {} in group {}: {}",
                    entry.id, self.group, e
                ))
            })?;

        debug!("Acknowledged entry: {} for group: {}", entry.id, self.group);
        Ok(())
    }

    /// Live delivery path: process, then acknowledge.
    ///
    /// # Errors
    /// Propagates process and acknowledge failures; the caller logs and
    /// continues, leaving the entry pending for the reaper.
    pub async fn orchestrate(&self, entry: &StreamEntry) -> Result<()> {
        self.process(entry).await?;
        self.acknowledge(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{EVENT_CONTENT_KEY, EVENT_OPERATION_KEY};
    use crate::policy::{CachingPattern, CachingPolicy};
    use crate::repository::InMemoryRepository;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
    struct Employer {
        id: u64,
        name: String,
    }

    impl CacheEntity for Employer {
        type Key = u64;

        fn cache_key(&self) -> Self::Key {
            self.id
        }

        fn entity_name() -> &'static str {
            "employer"
        }

        fn caching_policy() -> CachingPolicy {
            CachingPolicy::new(&[CachingPattern::WriteBehind])
        }
    }

    #[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
    struct UuidEntity {
        id: uuid::Uuid,
        label: String,
    }

    impl CacheEntity for UuidEntity {
        type Key = uuid::Uuid;

        fn cache_key(&self) -> Self::Key {
            self.id
        }

        fn entity_name() -> &'static str {
            "uuidentity"
        }
    }

    // Pool creation is lazy; no server is contacted until a connection is
    // requested, so process() is fully testable offline.
    fn test_pool() -> Pool {
        deadpool_redis::Config::from_url("redis://localhost:6379/15")
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .expect("Failed to create pool")
    }

    fn entry(id: &str, fields: &[(&str, &str)]) -> StreamEntry {
        let mut entry = StreamEntry::new("wb:stream:entity:employer", id);
        for (k, v) in fields {
            entry = entry.with_field(*k, *v);
        }
        entry
    }

    #[tokio::test]
    async fn test_process_upsert_fans_out_to_all_stores() {
        let first = Arc::new(InMemoryRepository::new());
        let second = Arc::new(InMemoryRepository::new());
        let processor =
            Processor::<Employer, _>::new(test_pool(), vec![first.clone(), second.clone()]);

        processor
            .process(&entry(
                "1-1",
                &[(EVENT_CONTENT_KEY, r#"{"id":1,"name":"A"}"#)],
            ))
            .await
            .expect("Failed to process");

        assert_eq!(first.get(&1).expect("Missing in first store").name, "A");
        assert_eq!(second.get(&1).expect("Missing in second store").name, "A");
    }

    #[tokio::test]
    async fn test_process_delete_parses_typed_id() {
        let store = Arc::new(InMemoryRepository::new());
        store.insert(Employer {
            id: 9,
            name: "B".to_string(),
        });
        let processor = Processor::<Employer, _>::new(test_pool(), vec![store.clone()]);

        processor
            .process(&entry(
                "1-2",
                &[(EVENT_CONTENT_KEY, "9"), (EVENT_OPERATION_KEY, "DELETE")],
            ))
            .await
            .expect("Failed to process");

        assert!(store.get(&9).is_none());
    }

    #[tokio::test]
    async fn test_process_delete_with_uuid_id() {
        let store = Arc::new(InMemoryRepository::new());
        let id = uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000")
            .expect("Failed to parse uuid");
        store.insert(UuidEntity {
            id,
            label: "C".to_string(),
        });
        let processor = Processor::<UuidEntity, _>::new(test_pool(), vec![store.clone()]);

        let mut entry = StreamEntry::new("wb:stream:entity:uuidentity", "1-3");
        entry = entry
            .with_field(EVENT_CONTENT_KEY, id.to_string())
            .with_field(EVENT_OPERATION_KEY, "DELETE");
        processor.process(&entry).await.expect("Failed to process");

        assert!(store.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_process_skips_init_entry() {
        let store = Arc::new(InMemoryRepository::new());
        let processor = Processor::<Employer, _>::new(test_pool(), vec![store.clone()]);

        processor
            .process(&entry("1-0", &[("init", "true")]))
            .await
            .expect("Init entry must be skipped");

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_process_bad_json_is_bad_payload() {
        let store = Arc::new(InMemoryRepository::new());
        let processor = Processor::<Employer, _>::new(test_pool(), vec![store]);

        let result = processor
            .process(&entry("1-4", &[(EVENT_CONTENT_KEY, "{broken")]))
            .await;
        assert!(matches!(result, Err(Error::BadPayload(_))));
    }

    #[tokio::test]
    async fn test_process_unparseable_id_is_bad_payload() {
        let store = Arc::new(InMemoryRepository::new());
        let processor = Processor::<Employer, _>::new(test_pool(), vec![store]);

        let result = processor
            .process(&entry(
                "1-5",
                &[
                    (EVENT_CONTENT_KEY, "not-a-number"),
                    (EVENT_OPERATION_KEY, "DELETE"),
                ],
            ))
            .await;
        assert!(matches!(result, Err(Error::BadPayload(_))));
    }

    #[tokio::test]
    async fn test_process_store_failure_is_aggregate() {
        let healthy = Arc::new(InMemoryRepository::new());
        let failing = Arc::new(InMemoryRepository::new());
        failing.fail_times(1);
        let processor =
            Processor::<Employer, _>::new(test_pool(), vec![failing, healthy.clone()]);

        let result = processor
            .process(&entry(
                "1-6",
                &[(EVENT_CONTENT_KEY, r#"{"id":2,"name":"D"}"#)],
            ))
            .await;

        assert!(matches!(result, Err(Error::ProcessMessage(_))));
        // The healthy store was still attempted.
        assert!(healthy.get(&2).is_some());
    }

    #[tokio::test]
    async fn test_process_is_idempotent() {
        let store = Arc::new(InMemoryRepository::new());
        let processor = Processor::<Employer, _>::new(test_pool(), vec![store.clone()]);
        let e = entry("1-7", &[(EVENT_CONTENT_KEY, r#"{"id":3,"name":"E"}"#)]);

        processor.process(&e).await.expect("Failed to process");
        processor.process(&e).await.expect("Failed to re-process");

        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_group_name_derivation() {
        let processor = Processor::<Employer, InMemoryRepository<Employer>>::new(
            test_pool(),
            vec![Arc::new(InMemoryRepository::new())],
        );
        assert_eq!(processor.group(), "memory_group");
    }
}
