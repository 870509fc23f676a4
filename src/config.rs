//! Tuning configuration for the consumer poll loop and the pending-entry
//! reaper.
//!
//! Both structs carry the documented defaults and accept environment
//! overrides. The recognized settings and their environment renderings:
//!
//! | Setting                      | Env variable                       | Default   |
//! |------------------------------|------------------------------------|-----------|
//! | `stream.poll-timeout`        | `CACHEFLOW_STREAM_POLL_TIMEOUT_MS` | 1000 ms   |
//! | `stream.batch-size`          | `CACHEFLOW_STREAM_BATCH_SIZE`      | 100       |
//! | `listener.pel.max-attempts`  | `CACHEFLOW_PEL_MAX_ATTEMPTS`       | 3         |
//! | `listener.pel.max-retention` | `CACHEFLOW_PEL_MAX_RETENTION_MS`   | 120000 ms |
//! | `listener.pel.batch-size`    | `CACHEFLOW_PEL_BATCH_SIZE`         | 50        |
//! | `listener.pel.fixed-delay`   | `CACHEFLOW_PEL_FIXED_DELAY_MS`     | 300000 ms |

use crate::error::{Error, Result};
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Consumer poll-loop configuration.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Upper bound on a single blocking stream read.
    pub poll_timeout: Duration,
    /// Maximum entries fetched per read.
    pub batch_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            poll_timeout: Duration::from_millis(1000),
            batch_size: 100,
        }
    }
}

impl StreamConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = StreamConfig::default();
        if let Some(ms) = env_parse::<u64>("CACHEFLOW_STREAM_POLL_TIMEOUT_MS") {
            config.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("CACHEFLOW_STREAM_BATCH_SIZE") {
            config.batch_size = n;
        }
        config
    }

    /// Override the poll timeout.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Override the read batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for a zero batch size or poll timeout.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::ConfigError(
                "stream.batch-size must be at least 1".to_string(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::ConfigError(
                "stream.poll-timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pending-entry reaper configuration.
#[derive(Clone, Debug)]
pub struct PendingConfig {
    /// Processing attempts before an entry is dead-lettered.
    pub max_attempts: u64,
    /// Lifetime of the per-entry retry counter; also the oldest-retry
    /// horizon.
    pub max_retention: Duration,
    /// Pending entries inspected per tick.
    pub batch_size: usize,
    /// Fixed delay between reaper ticks.
    pub fixed_delay: Duration,
}

impl Default for PendingConfig {
    fn default() -> Self {
        PendingConfig {
            max_attempts: 3,
            max_retention: Duration::from_millis(120_000),
            batch_size: 50,
            fixed_delay: Duration::from_millis(300_000),
        }
    }
}

impl PendingConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = PendingConfig::default();
        if let Some(n) = env_parse::<u64>("CACHEFLOW_PEL_MAX_ATTEMPTS") {
            config.max_attempts = n;
        }
        if let Some(ms) = env_parse::<u64>("CACHEFLOW_PEL_MAX_RETENTION_MS") {
            config.max_retention = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("CACHEFLOW_PEL_BATCH_SIZE") {
            config.batch_size = n;
        }
        if let Some(ms) = env_parse::<u64>("CACHEFLOW_PEL_FIXED_DELAY_MS") {
            config.fixed_delay = Duration::from_millis(ms);
        }
        config
    }

    /// Override the attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override the retry-counter retention.
    pub fn with_max_retention(mut self, max_retention: Duration) -> Self {
        self.max_retention = max_retention;
        self
    }

    /// Override the per-tick batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the tick delay.
    pub fn with_fixed_delay(mut self, fixed_delay: Duration) -> Self {
        self.fixed_delay = fixed_delay;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for a zero attempt limit, batch size, or
    /// delay.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::ConfigError(
                "listener.pel.max-attempts must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::ConfigError(
                "listener.pel.batch-size must be at least 1".to_string(),
            ));
        }
        if self.fixed_delay.is_zero() {
            return Err(Error::ConfigError(
                "listener.pel.fixed-delay must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
