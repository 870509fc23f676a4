//! Stream producer: appends write-behind intents to entity streams.

use crate::envelope::Intent;
use crate::error::{Error, Result};
use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Pool};
use std::sync::{Arc, Mutex};

/// Trait for intent producers.
///
/// The facade appends through this seam so that write paths can be exercised
/// without a live server (see [`RecordingProducer`]).
#[async_trait]
pub trait IntentProducer: Send + Sync {
    /// Append an intent to a stream with a server-generated entry id.
    ///
    /// # Returns
    /// The assigned entry id.
    ///
    /// # Errors
    /// Returns `Err` if the append fails
    async fn append(&self, stream_key: &str, intent: &Intent) -> Result<String>;
}

/// Producer appending intents to Redis streams via XADD.
#[derive(Clone)]
pub struct StreamProducer {
    pool: Pool,
}

impl StreamProducer {
    /// Create a producer over a shared connection pool.
    pub fn new(pool: Pool) -> Self {
        StreamProducer { pool }
    }
}

#[async_trait]
impl IntentProducer for StreamProducer {
    async fn append(&self, stream_key: &str, intent: &Intent) -> Result<String> {
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Redis connection: {}", e))
        })?;

        let fields = intent.to_fields();
        let entry_id: String = conn
            .xadd_map(stream_key, "*", &fields[..])
            .await
            .map_err(|e| {
                Error::BackendError(format!("Redis XADD failed for {}: {}", stream_key, e))
            })?;

        debug!("RecordId {} appended to stream {}", entry_id, stream_key);
        Ok(entry_id)
    }
}

/// In-memory producer that records appended intents; test double.
#[derive(Clone, Default)]
pub struct RecordingProducer {
    appended: Arc<Mutex<Vec<(String, Intent)>>>,
}

impl RecordingProducer {
    /// Create an empty recording producer.
    pub fn new() -> Self {
        RecordingProducer::default()
    }

    /// Number of recorded appends.
    pub fn len(&self) -> usize {
        self.appended.lock().expect("Failed to lock appends").len()
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all recorded appends, clearing the log.
    pub fn take(&self) -> Vec<(String, Intent)> {
        std::mem::take(&mut *self.appended.lock().expect("Failed to lock appends"))
    }
}

#[async_trait]
impl IntentProducer for RecordingProducer {
    async fn append(&self, stream_key: &str, intent: &Intent) -> Result<String> {
        let mut appended = self.appended.lock().expect("Failed to lock appends");
        appended.push((stream_key.to_string(), intent.clone()));
        Ok(format!("0-{}", appended.len()))
    }
}
