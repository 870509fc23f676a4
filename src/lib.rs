//! # cacheflow
//!
//! Classical caching patterns over a Redis-compatible server with stream
//! primitives and keyspace expiration notifications.
//!
//! ## Features
//!
//! - **Cache-Aside:** read-through with write-back on cache miss
//! - **Write-Behind:** writes append durable intents to a per-entity
//!   stream; a consumer group drains it into the stores of record, with a
//!   pending-entry retry loop and a dead-letter stream
//! - **Refresh-Ahead:** expired cache keys are re-filled from the primary
//!   store before the next read
//! - **Fully Generic:** any `serde` entity with a string-convertible id
//! - **Store Agnostic:** primary stores plug in behind one async trait
//! - **Production Ready:** structured logging, metrics hooks, graceful
//!   shutdown
//!
//! ## Quick Start
//!
//! ```ignore
//! use cacheflow::{
//!     backend::{RedisBackend, RedisConfig},
//!     CacheEntity, CacheRuntime, CachingFormat, CachingPattern, CachingPolicy,
//! };
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! // 1. Define your entity and declare its policy
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Employer {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl CacheEntity for Employer {
//!     type Key = u64;
//!     fn cache_key(&self) -> Self::Key { self.id }
//!     fn entity_name() -> &'static str { "employer" }
//!     fn caching_policy() -> CachingPolicy {
//!         CachingPolicy::new(&[
//!             CachingPattern::CacheAside,
//!             CachingPattern::WriteBehind,
//!         ])
//!         .with_ttl_seconds(60)
//!     }
//! }
//!
//! // 2. Implement EntityRepository for your store of record (SQLx,
//! //    tokio-postgres, MongoDB, ...), then wire everything up:
//! # async fn wire(pg_store: Arc<PgEmployerStore>) -> cacheflow::Result<()> {
//! let config = RedisConfig::default();
//! let backend = RedisBackend::new(config.clone())?;
//! let mut runtime = CacheRuntime::new(
//!     backend.pool().clone(),
//!     config.connection_string(),
//! )?;
//!
//! let employers = runtime
//!     .register::<Employer, _, _>(backend, vec![pg_store])
//!     .await?;
//! runtime.start();
//!
//! // 3. Use the facade - saves return as soon as the intent is durable
//! employers.save(Employer { id: 1, name: "ACME".into() }).await?;
//! let found = employers.find_by_id(&1).await?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod cache_store;
pub mod config;
pub mod consumer;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod expiry;
pub mod facade;
pub mod keys;
pub mod observability;
pub mod policy;
pub mod processor;
pub mod producer;
pub mod reaper;
pub mod repository;
pub mod runtime;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use config::{PendingConfig, StreamConfig};
pub use entity::CacheEntity;
pub use envelope::{Intent, Operation, StreamEntry};
pub use error::{Error, Result};
pub use facade::CacheFacade;
pub use policy::{CachingFormat, CachingPattern, CachingPolicy, PolicyRegistry};
pub use processor::Processor;
pub use producer::{IntentProducer, StreamProducer};
pub use repository::EntityRepository;
pub use runtime::CacheRuntime;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
