//! Offline pipeline tests for cacheflow.
//!
//! These tests verify end-to-end behavior of the facade, the intent
//! envelope, and the processor without a live server: intents recorded by
//! the facade are replayed through the processor against in-memory stores,
//! which is exactly what the consumer does with delivered entries.

use cacheflow::backend::InMemoryBackend;
use cacheflow::envelope::{DeadLetterRecord, Operation, StreamEntry};
use cacheflow::keys::{EVENT_CONTENT_KEY, EVENT_OPERATION_KEY};
use cacheflow::producer::{IntentProducer, RecordingProducer};
use cacheflow::repository::InMemoryRepository;
use cacheflow::{
    CacheEntity, CacheFacade, CachingFormat, CachingPattern, CachingPolicy, Intent,
    PolicyRegistry, Processor,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
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
        CachingPolicy::new(&[CachingPattern::WriteBehind, CachingPattern::CacheAside])
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct Badge {
    id: uuid::Uuid,
    label: String,
}

impl CacheEntity for Badge {
    type Key = uuid::Uuid;

    fn cache_key(&self) -> Self::Key {
        self.id
    }

    fn entity_name() -> &'static str {
        "badge"
    }

    fn caching_policy() -> CachingPolicy {
        CachingPolicy::new(&[CachingPattern::WriteBehind]).with_format(CachingFormat::Hash)
    }
}

fn test_pool() -> deadpool_redis::Pool {
    // Pool creation is lazy; nothing connects unless acknowledge() runs.
    deadpool_redis::Config::from_url("redis://localhost:6379/15")
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("Failed to create pool")
}

type EmployerFacade =
    CacheFacade<Employer, InMemoryBackend, InMemoryRepository<Employer>, RecordingProducer>;

struct Pipeline {
    facade: EmployerFacade,
    producer: RecordingProducer,
    store: Arc<InMemoryRepository<Employer>>,
    processor: Processor<Employer, InMemoryRepository<Employer>>,
}

fn pipeline() -> Pipeline {
    let producer = RecordingProducer::new();
    let store = Arc::new(InMemoryRepository::new());
    let facade = CacheFacade::new(
        InMemoryBackend::new(),
        store.clone(),
        producer.clone(),
        Arc::new(PolicyRegistry::new()),
    );
    let processor = Processor::new(test_pool(), vec![store.clone()]);
    Pipeline {
        facade,
        producer,
        store,
        processor,
    }
}

/// Replay recorded intents through the processor, the way the consumer
/// replays delivered entries.
async fn drain(pipeline: &Pipeline) {
    for (i, (stream_key, intent)) in pipeline.producer.take().into_iter().enumerate() {
        let mut entry = StreamEntry::new(stream_key, format!("1-{}", i));
        for (k, v) in intent.to_fields() {
            entry = entry.with_field(k, v);
        }
        pipeline
            .processor
            .process(&entry)
            .await
            .expect("Failed to process intent");
    }
}

#[tokio::test]
async fn save_then_drain_reaches_the_store() {
    let p = pipeline();

    p.facade
        .save(Employer {
            id: 1,
            name: "A".to_string(),
        })
        .await
        .expect("Failed to save");

    // The write returned before any store was touched.
    assert!(p.store.is_empty());

    drain(&p).await;
    assert_eq!(p.store.get(&1).expect("Store missing row").name, "A");
}

#[tokio::test]
async fn two_saves_converge_to_one_row() {
    let p = pipeline();

    p.facade
        .save(Employer {
            id: 2,
            name: "first".to_string(),
        })
        .await
        .expect("Failed to save");
    p.facade
        .save(Employer {
            id: 2,
            name: "second".to_string(),
        })
        .await
        .expect("Failed to save");

    drain(&p).await;
    assert_eq!(p.store.len(), 1);
    assert_eq!(p.store.get(&2).expect("Store missing row").name, "second");
}

#[tokio::test]
async fn delete_after_save_yields_not_found() {
    let p = pipeline();

    p.facade
        .save(Employer {
            id: 3,
            name: "B".to_string(),
        })
        .await
        .expect("Failed to save");
    p.facade.delete(&3).await.expect("Failed to delete");

    drain(&p).await;
    assert!(p.store.get(&3).is_none());

    let found = p.facade.find_by_id(&3).await.expect("Failed to find");
    assert!(found.is_none());
}

#[tokio::test]
async fn save_then_find_after_drain_round_trips() {
    let p = pipeline();
    let employer = Employer {
        id: 4,
        name: "C".to_string(),
    };

    p.facade.save(employer.clone()).await.expect("Failed to save");
    drain(&p).await;

    let found = p.facade.find_by_id(&4).await.expect("Failed to find");
    assert_eq!(found, Some(employer));
}

#[tokio::test]
async fn intents_preserve_call_order() {
    let p = pipeline();

    p.facade
        .save(Employer {
            id: 5,
            name: "v1".to_string(),
        })
        .await
        .expect("Failed to save");
    p.facade
        .save(Employer {
            id: 5,
            name: "v2".to_string(),
        })
        .await
        .expect("Failed to save");
    p.facade.delete(&5).await.expect("Failed to delete");

    let appended = p.producer.take();
    assert_eq!(appended.len(), 3);
    assert_eq!(appended[0].1.operation, None);
    assert_eq!(appended[1].1.operation, None);
    assert_eq!(appended[2].1.operation, Some(Operation::Delete));
}

#[tokio::test]
async fn uuid_entity_delete_round_trips_through_the_envelope() {
    let producer = RecordingProducer::new();
    let store = Arc::new(InMemoryRepository::new());
    let facade: CacheFacade<Badge, _, _, _> = CacheFacade::new(
        InMemoryBackend::new(),
        store.clone(),
        producer.clone(),
        Arc::new(PolicyRegistry::new()),
    );
    let processor: Processor<Badge, _> = Processor::new(test_pool(), vec![store.clone()]);

    let id = uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000")
        .expect("Failed to parse uuid");
    store.insert(Badge {
        id,
        label: "gold".to_string(),
    });

    facade.delete(&id).await.expect("Failed to delete");

    let (stream_key, intent) = producer.take().pop().expect("No intent recorded");
    assert_eq!(stream_key, "wb:stream:entity:badge");
    assert_eq!(intent.content, id.to_string());

    let mut entry = StreamEntry::new(stream_key, "1-0");
    for (k, v) in intent.to_fields() {
        entry = entry.with_field(k, v);
    }
    processor.process(&entry).await.expect("Failed to process");
    assert!(store.get(&id).is_none());
}

#[tokio::test]
async fn replaying_a_dead_letter_record_matches_a_single_apply() {
    let store = Arc::new(InMemoryRepository::new());
    let processor: Processor<Employer, _> = Processor::new(test_pool(), vec![store.clone()]);

    let original = StreamEntry::new("wb:stream:entity:employer", "7-0")
        .with_field(EVENT_CONTENT_KEY, r#"{"id":6,"name":"D"}"#);
    let record = DeadLetterRecord::from_entry(
        &original,
        "Too many attempts",
        "Store unavailable: injected",
        "employer_memory_consumer",
        "memory_group",
    );

    // Rebuild an entry from the DLQ record, as an operator replay would.
    let mut replay = StreamEntry::new("wb:stream:entity:employer:dlq", "8-0");
    for (k, v) in record.fields() {
        replay = replay.with_field(k.clone(), v.clone());
    }
    processor
        .process(&replay)
        .await
        .expect("Failed to replay DLQ record");

    assert_eq!(p_store_state(&store), vec![(6, "D".to_string())]);

    // A direct apply of the original entry produces the same state.
    let direct = Arc::new(InMemoryRepository::new());
    let direct_processor: Processor<Employer, _> =
        Processor::new(test_pool(), vec![direct.clone()]);
    direct_processor
        .process(&original)
        .await
        .expect("Failed to process original");
    assert_eq!(p_store_state(&store), p_store_state(&direct));
}

fn p_store_state(store: &InMemoryRepository<Employer>) -> Vec<(u64, String)> {
    let mut state: Vec<(u64, String)> = store
        .entities()
        .into_iter()
        .map(|e| (e.id, e.name))
        .collect();
    state.sort();
    state
}

#[tokio::test]
async fn init_marker_from_bootstrap_is_ignored() {
    let store = Arc::new(InMemoryRepository::new());
    let processor: Processor<Employer, _> = Processor::new(test_pool(), vec![store.clone()]);

    let entry = StreamEntry::new("wb:stream:entity:employer", "0-1").with_field("init", "true");
    processor
        .process(&entry)
        .await
        .expect("Init marker must be harmless");
    assert!(store.is_empty());
}

#[tokio::test]
async fn dlq_reason_fields_survive_replay_decoding() {
    // The DLQ diagnostic fields do not confuse the processor: only content
    // and operation are interpreted.
    let store = Arc::new(InMemoryRepository::new());
    let processor: Processor<Employer, _> = Processor::new(test_pool(), vec![store.clone()]);

    let replay = StreamEntry::new("wb:stream:entity:employer:dlq", "9-0")
        .with_field(EVENT_CONTENT_KEY, "11")
        .with_field(EVENT_OPERATION_KEY, "DELETE")
        .with_field("reason", "Too many attempts")
        .with_field("error", "whatever")
        .with_field("group", "memory_group");

    store.insert(Employer {
        id: 11,
        name: "E".to_string(),
    });
    processor.process(&replay).await.expect("Failed to replay");
    assert!(store.get(&11).is_none());
}

#[tokio::test]
async fn producer_seam_matches_stream_contract() {
    let producer = RecordingProducer::new();
    let id = producer
        .append(
            "wb:stream:entity:employer",
            &Intent::upsert(r#"{"id":1,"name":"A"}"#.to_string()),
        )
        .await
        .expect("Failed to append");
    assert!(!id.is_empty());
    assert_eq!(producer.len(), 1);
}
