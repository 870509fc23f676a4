//! Pending-entry reaper: the retry and dead-letter loop.
//!
//! The reaper periodically scans a consumer group's pending list and
//! re-drives unacknowledged entries through the processor. Each visit bumps
//! a per-entry retry counter (TTL-bounded by `max_retention`); entries that
//! keep failing past `max_attempts` move to the dead-letter stream with
//! full failure context and are acknowledged out of the live pending set.
//!
//! State machine per entry:
//!
//! ```text
//! NEW ── deliver ─► INFLIGHT ── process ok ─► ACKED (terminal)
//!                      │
//!                      ├── process err (n<MAX) ─► PENDING ──(reaper)──► INFLIGHT
//!                      └── process err (n≥MAX) ─► DLQ ─ ack ─► ACKED (terminal)
//! ```

use crate::config::PendingConfig;
use crate::entity::CacheEntity;
use crate::envelope::{DeadLetterRecord, StreamEntry};
use crate::error::{Error, Result};
use crate::keys::{consumer_name, counter_key, dlq_stream_key, stream_key};
use crate::processor::Processor;
use crate::repository::EntityRepository;
use deadpool_redis::{
    redis::{
        streams::{StreamPendingCountReply, StreamPendingReply, StreamRangeReply},
        AsyncCommands,
    },
    Connection, Pool,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// DLQ reason for entries that exhausted their processing attempts.
pub const DLQ_REASON_TOO_MANY_ATTEMPTS: &str = "Too many attempts";
/// DLQ reason for entries whose acknowledge kept failing.
pub const DLQ_REASON_LONG_LASTING: &str = "Long lasting message";

/// What the reaper should do with a failed pending entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RetryVerdict {
    /// Leave the entry pending for the next tick.
    Retry,
    /// Dead-letter with the given reason and stop the batch.
    DeadLetter(&'static str),
}

/// Decide the fate of a pending entry after a failed attempt.
///
/// The attempt count is authoritative: undecodable payloads burn through
/// their attempts like any other processing failure and land in the DLQ
/// with the same reason.
pub(crate) fn verdict_for(error: &Error, attempts: u64, max_attempts: u64) -> RetryVerdict {
    if attempts < max_attempts {
        return RetryVerdict::Retry;
    }
    match error {
        Error::AcknowledgeMessage(_) => RetryVerdict::DeadLetter(DLQ_REASON_LONG_LASTING),
        _ => RetryVerdict::DeadLetter(DLQ_REASON_TOO_MANY_ATTEMPTS),
    }
}

/// Periodic retry loop for one `(entity, store)` consumer group.
pub struct PendingReaper<E, R>
where
    E: CacheEntity,
    R: EntityRepository<E>,
{
    pool: Pool,
    processor: Arc<Processor<E, R>>,
    config: PendingConfig,
    stream_key: String,
    dlq_key: String,
    group: String,
    consumer: String,
}

impl<E, R> PendingReaper<E, R>
where
    E: CacheEntity,
    R: EntityRepository<E> + 'static,
{
    /// Create a reaper for the processor's group.
    pub fn new(pool: Pool, processor: Arc<Processor<E, R>>, config: PendingConfig) -> Self {
        let group = processor.group().to_string();
        PendingReaper {
            pool,
            processor,
            config,
            stream_key: stream_key::<E>(),
            dlq_key: dlq_stream_key::<E>(),
            group,
            consumer: consumer_name::<E>(R::STORE_NAME),
        }
    }

    /// Spawn the periodic loop; it stops when `shutdown` flips to `true`.
    ///
    /// Ticks run inline in the spawned task, so a tick is always allowed to
    /// finish before the next one starts or shutdown completes.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.fixed_delay,
            self.config.fixed_delay,
        );
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Pending reaper started for stream {} group {}",
            self.stream_key, self.group
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Error processing pending entries: {}", e);
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!(
            "Pending reaper stopped for stream {} group {}",
            self.stream_key, self.group
        );
    }

    /// One reaper pass over the pending list.
    ///
    /// # Errors
    /// Returns the first failure that aborted the batch; entries already
    /// handled in the pass keep their outcome.
    pub async fn tick(&self) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Redis connection: {}", e))
        })?;

        let summary: StreamPendingReply =
            conn.xpending(&self.stream_key, &self.group).await?;
        if summary.count() == 0 {
            debug!("Pending entries not found for group {}", self.group);
            return Ok(());
        }
        info!(
            "Found {} pending entries for group {}",
            summary.count(),
            self.group
        );

        let pending: StreamPendingCountReply = conn
            .xpending_consumer_count(
                &self.stream_key,
                &self.group,
                "-",
                "+",
                self.config.batch_size,
                &self.consumer,
            )
            .await?;

        for pe in pending.ids {
            let entry_id = pe.id.clone();
            info!("Entry {} re-processing", entry_id);

            let counter = counter_key(&self.stream_key, &entry_id);
            let attempts = self.bump_counter(&mut conn, &counter).await?;
            debug!(
                "Attempts: {} - Elapsed time: {} ms",
                attempts, pe.last_delivered_ms
            );

            let range: StreamRangeReply =
                conn.xrange(&self.stream_key, &entry_id, &entry_id).await?;
            let Some(sid) = range.ids.first() else {
                // Entry trimmed away since delivery; nothing to re-drive.
                continue;
            };
            let entry = crate::consumer::entry_from_stream_id(&self.stream_key, sid);

            let failure = match self.processor.process(&entry).await {
                Ok(()) => match self.processor.acknowledge(&entry).await {
                    Ok(()) => {
                        self.delete_counter(&mut conn, &counter).await;
                        info!("Successfully processed pending entry: {}", entry_id);
                        continue;
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            error!(
                "Error processing pending entry: {} - {}",
                entry_id, failure
            );
            match verdict_for(&failure, attempts, self.config.max_attempts) {
                RetryVerdict::Retry => {}
                RetryVerdict::DeadLetter(reason) => {
                    self.move_to_dlq(&mut conn, &entry, reason, &failure).await?;
                    self.delete_counter(&mut conn, &counter).await;
                    return Err(failure);
                }
            }
        }
        Ok(())
    }

    /// Increment the retry counter and refresh its retention TTL.
    async fn bump_counter(&self, conn: &mut Connection, counter: &str) -> Result<u64> {
        let attempts: u64 = conn.incr(counter, 1u64).await?;
        conn.pexpire::<_, i64>(counter, self.config.max_retention.as_millis() as i64)
            .await?;
        Ok(attempts)
    }

    async fn delete_counter(&self, conn: &mut Connection, counter: &str) {
        if let Err(e) = conn.del::<_, ()>(counter).await {
            warn!("Failed to delete retry counter {}: {}", counter, e);
        }
    }

    /// Copy the entry into the DLQ with failure context, then acknowledge
    /// the original so it leaves the pending set.
    async fn move_to_dlq(
        &self,
        conn: &mut Connection,
        entry: &StreamEntry,
        reason: &str,
        error: &Error,
    ) -> Result<()> {
        entry.dump();
        error!("Received error: {}", error);

        let record = DeadLetterRecord::from_entry(
            entry,
            reason,
            &error.to_string(),
            &self.consumer,
            &self.group,
        );
        conn.xadd_map::<_, _, _, String>(&self.dlq_key, "*", record.fields())
            .await
            .map_err(|e| {
                Error::BackendError(format!(
                    "Failed to append to dead letter stream {}: {}",
                    self.dlq_key, e
                ))
            })?;
        warn!(
            "Entry {} moved to dead letter stream for manual processing.",
            entry.id
        );

        conn.xack::<_, _, _, i64>(&self.stream_key, &self.group, &[&entry.id])
            .await
            .map_err(|e| {
                Error::AcknowledgeMessage(format!(
                    "Failed to acknowledge dead-lettered entry {}: {}",
                    entry.id, e
                ))
            })?;
        warn!("And entry {} acknowledged.", entry.id);
        Ok(())
    }
}
