//! Refresh-ahead expiration listener.
//!
//! Subscribes to the server's keyspace expiration channel and routes expired
//! cache keys back to the owning entity's facade for a refill. One listener
//! task serves the whole process; registered entities each get a channel of
//! ids extracted from keys under their prefix.

use crate::error::{Error, Result};
use crate::keys::split_cache_key;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Pattern matching key-expiration events on any database.
pub const EXPIRED_EVENT_PATTERN: &str = "__keyevent@*__:expired";

/// Capacity of each per-entity refill channel.
const REFILL_CHANNEL_CAPACITY: usize = 256;

/// Ensure the server publishes key-expiration events.
///
/// One-time startup step; sets `notify-keyspace-events` to `Ex`.
///
/// # Errors
/// Returns `Error::BackendError` when the CONFIG SET fails.
pub async fn configure_keyspace_events(pool: &Pool) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| Error::BackendError(format!("Failed to get Redis connection: {}", e)))?;

    let result: String = deadpool_redis::redis::cmd("CONFIG")
        .arg("SET")
        .arg("notify-keyspace-events")
        .arg("Ex")
        .query_async(&mut *conn)
        .await
        .map_err(|e| {
            Error::BackendError(format!("CONFIG SET notify-keyspace-events failed: {}", e))
        })?;

    debug!("Keyspace expiration events configuration result: {}", result);
    Ok(())
}

struct PrefixRoute {
    prefix: &'static str,
    sender: mpsc::Sender<String>,
}

/// Process-wide listener for expired cache keys.
///
/// Register each refresh-ahead entity's prefix before spawning; the returned
/// receiver yields the textual ids of expired entries under that prefix.
pub struct ExpirationListener {
    client: redis::Client,
    routes: Vec<PrefixRoute>,
}

impl ExpirationListener {
    /// Create a listener using a dedicated subscription connection.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an invalid connection string.
    pub fn new(connection_string: &str) -> Result<Self> {
        let client = redis::Client::open(connection_string).map_err(|e| {
            Error::ConfigError(format!("Invalid Redis connection string: {}", e))
        })?;
        Ok(ExpirationListener {
            client,
            routes: Vec::new(),
        })
    }

    /// Register a cache-key prefix; expired ids under it arrive on the
    /// returned channel.
    pub fn register(&mut self, prefix: &'static str) -> mpsc::Receiver<String> {
        let (sender, receiver) = mpsc::channel(REFILL_CHANNEL_CAPACITY);
        self.routes.push(PrefixRoute { prefix, sender });
        receiver
    }

    /// Whether any prefixes are registered.
    pub fn has_routes(&self) -> bool {
        !self.routes.is_empty()
    }

    /// Spawn the subscription loop; it unsubscribes and stops when
    /// `shutdown` flips to `true`.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(shutdown).await {
                error!("Expiration listener terminated: {}", e);
            }
        })
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            Error::BackendError(format!("Failed to open subscription connection: {}", e))
        })?;
        pubsub.psubscribe(EXPIRED_EVENT_PATTERN).await.map_err(|e| {
            Error::BackendError(format!(
                "PSUBSCRIBE {} failed: {}",
                EXPIRED_EVENT_PATTERN, e
            ))
        })?;
        info!(
            "Expiration listener initialized and listening for expired keys ({} prefixes)",
            self.routes.len()
        );

        {
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    message = messages.next() => {
                        match message {
                            Some(message) => {
                                match message.get_payload::<String>() {
                                    Ok(key) => self.dispatch(&key).await,
                                    Err(e) => warn!("Undecodable expiration event: {}", e),
                                }
                            }
                            None => {
                                warn!("Expiration subscription closed by server");
                                break;
                            }
                        }
                    }
                }
            }
        }

        if let Err(e) = pubsub.punsubscribe(EXPIRED_EVENT_PATTERN).await {
            debug!("PUNSUBSCRIBE failed during shutdown: {}", e);
        }
        info!("Expiration listener stopped");
        Ok(())
    }

    async fn dispatch(&self, key: &str) {
        debug!("Received expired key: {}", key);
        for route in &self.routes {
            if let Some(id) = split_cache_key(route.prefix, key) {
                debug!("Processing expired key: {}", key);
                if let Err(e) = route.sender.send(id.to_string()).await {
                    warn!("Refill channel closed for prefix {}: {}", route.prefix, e);
                }
                return;
            }
        }
        debug!("Ignoring expired key (no matching prefix): {}", key);
    }
}
