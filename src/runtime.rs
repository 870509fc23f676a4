//! Runtime wiring: explicit per-entity registration and worker lifecycle.
//!
//! Each call to [`register`](CacheRuntime::register) builds the entity's
//! facade and, per its policy, spawns the consumer, the pending reaper, and
//! a refresh-ahead refill worker. [`start`](CacheRuntime::start) launches
//! the shared expiration listener; [`shutdown`](CacheRuntime::shutdown)
//! stops polls, lets in-flight work finish, and releases the subscription.
//!
//! # Example
//!
//! ```ignore
//! let backend = RedisBackend::new(RedisConfig::default())?;
//! let mut runtime = CacheRuntime::new(
//!     backend.pool().clone(),
//!     RedisConfig::default().connection_string(),
//! )?;
//!
//! let employers = runtime
//!     .register::<Employer, _, _>(backend.clone(), vec![pg_store])
//!     .await?;
//! runtime.start();
//!
//! employers.save(employer).await?;
//! // ...
//! runtime.shutdown().await;
//! ```

use crate::backend::CacheBackend;
use crate::config::{PendingConfig, StreamConfig};
use crate::consumer::StreamConsumer;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::expiry::{configure_keyspace_events, ExpirationListener};
use crate::facade::CacheFacade;
use crate::policy::PolicyRegistry;
use crate::processor::Processor;
use crate::producer::StreamProducer;
use crate::reaper::PendingReaper;
use crate::repository::EntityRepository;
use deadpool_redis::Pool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Process-wide assembly of cacheflow components.
pub struct CacheRuntime {
    pool: Pool,
    connection_string: String,
    registry: Arc<PolicyRegistry>,
    stream_config: StreamConfig,
    pending_config: PendingConfig,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    expiration: Option<ExpirationListener>,
    keyspace_configured: bool,
}

impl CacheRuntime {
    /// Create a runtime over a shared pool.
    ///
    /// `connection_string` is used for the dedicated pub/sub connection of
    /// the expiration listener.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when the environment-derived tuning is
    /// invalid.
    pub fn new(pool: Pool, connection_string: impl Into<String>) -> Result<Self> {
        let stream_config = StreamConfig::from_env();
        stream_config.validate()?;
        let pending_config = PendingConfig::from_env();
        pending_config.validate()?;

        let (shutdown, _) = watch::channel(false);
        Ok(CacheRuntime {
            pool,
            connection_string: connection_string.into(),
            registry: Arc::new(PolicyRegistry::new()),
            stream_config,
            pending_config,
            shutdown,
            workers: Vec::new(),
            expiration: None,
            keyspace_configured: false,
        })
    }

    /// Replace the consumer tuning.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for invalid settings.
    pub fn with_stream_config(mut self, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        self.stream_config = config;
        Ok(self)
    }

    /// Replace the reaper tuning.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for invalid settings.
    pub fn with_pending_config(mut self, config: PendingConfig) -> Result<Self> {
        config.validate()?;
        self.pending_config = config;
        Ok(self)
    }

    /// The shared policy registry.
    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    /// Register an entity with its cache backend and bound primary stores.
    ///
    /// Builds the facade and, according to the entity's policy:
    /// - Write-Behind: bootstraps the consumer group and spawns the consumer
    ///   and the pending reaper
    /// - Refresh-Ahead: configures keyspace notifications (once per process)
    ///   and spawns the refill worker
    ///
    /// The first store in `stores` also serves as the facade's read-through
    /// primary.
    ///
    /// # Errors
    /// - `Error::PolicyMisconfigured` - invalid policy declaration
    /// - `Error::ConfigError` - no stores supplied
    /// - `Error::BackendError` - group bootstrap or keyspace configuration
    ///   failed
    pub async fn register<E, B, R>(
        &mut self,
        backend: B,
        stores: Vec<Arc<R>>,
    ) -> Result<Arc<CacheFacade<E, B, R, StreamProducer>>>
    where
        E: CacheEntity,
        B: CacheBackend + 'static,
        R: EntityRepository<E> + 'static,
    {
        E::caching_policy().validate()?;
        let primary = stores.first().cloned().ok_or_else(|| {
            Error::ConfigError(format!(
                "entity {} registered without a primary store",
                E::entity_name()
            ))
        })?;

        let facade = Arc::new(CacheFacade::<E, B, R, _>::new(
            backend,
            primary,
            StreamProducer::new(self.pool.clone()),
            self.registry.clone(),
        ));

        if self.registry.has_write_behind::<E>() {
            let processor = Arc::new(Processor::<E, R>::new(self.pool.clone(), stores));
            let consumer = StreamConsumer::new(
                self.pool.clone(),
                processor.clone(),
                self.stream_config.clone(),
            );
            consumer.ensure_group().await?;
            self.workers.push(consumer.spawn(self.shutdown.subscribe()));

            let reaper =
                PendingReaper::new(self.pool.clone(), processor, self.pending_config.clone());
            self.workers.push(reaper.spawn(self.shutdown.subscribe()));
        }

        if self.registry.has_refresh_ahead::<E>() {
            if !self.keyspace_configured {
                configure_keyspace_events(&self.pool).await?;
                self.keyspace_configured = true;
            }
            if self.expiration.is_none() {
                self.expiration = Some(ExpirationListener::new(&self.connection_string)?);
            }
            let Some(listener) = self.expiration.as_mut() else {
                return Err(Error::Other("expiration listener missing".to_string()));
            };
            let mut refills = listener.register(self.registry.prefix::<E>());

            let refill_facade = facade.clone();
            let mut shutdown = self.shutdown.subscribe();
            self.workers.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        id = refills.recv() => {
                            let Some(id_text) = id else { break };
                            let Ok(id) = id_text.parse::<E::Key>() else {
                                warn!(
                                    "Unparseable id {:?} on expired key for entity {}",
                                    id_text,
                                    E::entity_name()
                                );
                                continue;
                            };
                            match refill_facade.find_by_id(&id).await {
                                Ok(reloaded) => debug!(
                                    "Expired entity ({}:{}) reloaded: {}",
                                    E::entity_name(),
                                    id_text,
                                    reloaded.is_some()
                                ),
                                Err(e) => warn!(
                                    "Refill failed for {}:{}: {}",
                                    E::entity_name(),
                                    id_text,
                                    e
                                ),
                            }
                        }
                    }
                }
            }));
        }

        Ok(facade)
    }

    /// Launch the shared expiration listener, if any entity registered for
    /// refresh-ahead.
    pub fn start(&mut self) {
        if let Some(listener) = self.expiration.take() {
            if listener.has_routes() {
                self.workers.push(listener.spawn(self.shutdown.subscribe()));
            }
        }
    }

    /// Number of spawned workers; diagnostics and tests.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop all workers and wait for in-flight work to complete.
    pub async fn shutdown(mut self) {
        if self.shutdown.send(true).is_err() {
            debug!("No live workers at shutdown");
        }
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!("Worker terminated abnormally: {}", e);
            }
        }
        info!("cacheflow runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> Pool {
        deadpool_redis::Config::from_url("redis://localhost:6379/15")
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .expect("Failed to create pool")
    }

    #[tokio::test]
    async fn test_runtime_construction_and_tuning() {
        let runtime = CacheRuntime::new(test_pool(), "redis://localhost:6379/15")
            .expect("Failed to build runtime")
            .with_stream_config(StreamConfig::default().with_batch_size(10))
            .expect("Valid stream config rejected")
            .with_pending_config(PendingConfig::default().with_max_attempts(1))
            .expect("Valid pending config rejected");

        assert_eq!(runtime.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_runtime_rejects_invalid_tuning() {
        let runtime = CacheRuntime::new(test_pool(), "redis://localhost:6379/15")
            .expect("Failed to build runtime");
        assert!(runtime
            .with_stream_config(StreamConfig::default().with_batch_size(0))
            .is_err());
    }

    #[tokio::test]
    async fn test_shutdown_with_no_workers() {
        let runtime = CacheRuntime::new(test_pool(), "redis://localhost:6379/15")
            .expect("Failed to build runtime");
        runtime.shutdown().await;
    }
}
