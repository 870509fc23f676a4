//! Caching patterns and the per-entity policy model.
//!
//! Every entity declares a [`CachingPolicy`] through
//! [`CacheEntity::caching_policy`](crate::entity::CacheEntity::caching_policy).
//! The policy names the enabled patterns, the cache storage format, an
//! optional TTL, and an optional cache-namespace override.
//!
//! # The Three Patterns
//!
//! ```
//! use cacheflow::policy::CachingPattern;
//!
//! // Cache-Aside: on miss, read the store of record and populate the cache.
//! let _p = CachingPattern::CacheAside;
//!
//! // Refresh-Ahead: re-fill the cache on expiration notification.
//! let _p = CachingPattern::RefreshAhead;
//!
//! // Write-Behind: writes go to a durable stream, stores update async.
//! let _p = CachingPattern::WriteBehind;
//! ```
//!
//! Patterns combine freely; the union is folded into a bitset once per
//! entity type and memoized by the [`PolicyRegistry`].

use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::any::TypeId;
use std::time::Duration;

/// A single caching pattern, with a stable bit value so a set of patterns
/// folds into one integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CachingPattern {
    /// Cache-Aside (lazy loading): the read path fills the cache on miss.
    CacheAside,
    /// Refresh-Ahead: the cache is re-filled when a key expires, before the
    /// next read.
    RefreshAhead,
    /// Write-Behind (write-back): writes append to a durable stream and are
    /// applied to the stores asynchronously.
    WriteBehind,
}

impl CachingPattern {
    /// Bit value of this pattern, used for bitwise membership checks.
    pub fn bit(self) -> u8 {
        match self {
            CachingPattern::CacheAside => 1,
            CachingPattern::RefreshAhead => 2,
            CachingPattern::WriteBehind => 4,
        }
    }
}

impl std::fmt::Display for CachingPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CachingPattern::CacheAside => write!(f, "CacheAside"),
            CachingPattern::RefreshAhead => write!(f, "RefreshAhead"),
            CachingPattern::WriteBehind => write!(f, "WriteBehind"),
        }
    }
}

/// Storage format for cached entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CachingFormat {
    /// Store the entity as a JSON string value.
    #[default]
    Json,
    /// Store the entity as a hash of field/value pairs.
    Hash,
}

impl std::fmt::Display for CachingFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CachingFormat::Json => write!(f, "JSON"),
            CachingFormat::Hash => write!(f, "HASH"),
        }
    }
}

/// Immutable per-entity caching declaration.
///
/// # Example
///
/// ```
/// use cacheflow::policy::{CachingFormat, CachingPattern, CachingPolicy};
///
/// let policy = CachingPolicy::new(&[
///     CachingPattern::CacheAside,
///     CachingPattern::WriteBehind,
/// ])
/// .with_format(CachingFormat::Hash)
/// .with_ttl_seconds(300);
///
/// assert!(policy.enabled());
/// assert_eq!(policy.ttl(), Some(std::time::Duration::from_secs(300)));
/// ```
#[derive(Clone, Debug)]
pub struct CachingPolicy {
    patterns: Vec<CachingPattern>,
    format: CachingFormat,
    enabled: bool,
    ttl_seconds: i64,
    prefix: Option<&'static str>,
}

impl Default for CachingPolicy {
    fn default() -> Self {
        CachingPolicy {
            patterns: Vec::new(),
            format: CachingFormat::Json,
            enabled: true,
            ttl_seconds: 0,
            prefix: None,
        }
    }
}

impl CachingPolicy {
    /// Create a policy with the given patterns, JSON format, no TTL.
    pub fn new(patterns: &[CachingPattern]) -> Self {
        CachingPolicy {
            patterns: patterns.to_vec(),
            ..CachingPolicy::default()
        }
    }

    /// Select the cache storage format.
    pub fn with_format(mut self, format: CachingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the cache entry TTL in seconds. Zero or negative means no
    /// expiration.
    pub fn with_ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Override the cache namespace declared by the entity.
    pub fn with_prefix(mut self, prefix: &'static str) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Disable all patterns at runtime without changing the declaration.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Declared patterns, in declaration order.
    pub fn patterns(&self) -> &[CachingPattern] {
        &self.patterns
    }

    /// Cache storage format.
    pub fn format(&self) -> CachingFormat {
        self.format
    }

    /// Whether the policy is active.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Cache entry TTL, if expiration is configured.
    pub fn ttl(&self) -> Option<Duration> {
        if self.ttl_seconds > 0 {
            Some(Duration::from_secs(self.ttl_seconds as u64))
        } else {
            None
        }
    }

    /// Cache-namespace override, if declared.
    pub fn prefix_override(&self) -> Option<&'static str> {
        self.prefix
    }

    /// Fold the declared patterns into a bitset. Disabled policies fold to
    /// zero.
    pub fn bits(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        self.patterns.iter().fold(0, |acc, p| acc | p.bit())
    }

    /// Validate the declaration.
    ///
    /// # Errors
    /// Returns `Error::PolicyMisconfigured` for duplicate patterns or an
    /// empty namespace override.
    pub fn validate(&self) -> Result<()> {
        let bits = self.patterns.iter().fold(0u8, |acc, p| acc | p.bit());
        if bits.count_ones() as usize != self.patterns.len() {
            return Err(Error::PolicyMisconfigured(
                "duplicate caching pattern in declaration".to_string(),
            ));
        }
        if let Some(prefix) = self.prefix {
            if prefix.is_empty() {
                return Err(Error::PolicyMisconfigured(
                    "cache prefix override must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Memoized view of an entity's policy, resolved once per type.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedPolicy {
    /// Pattern bitset (zero when the policy is disabled).
    pub bits: u8,
    /// Cache storage format.
    pub format: CachingFormat,
    /// Cache entry TTL, if any.
    pub ttl: Option<Duration>,
    /// Effective cache namespace.
    pub prefix: &'static str,
}

impl ResolvedPolicy {
    fn has(&self, pattern: CachingPattern) -> bool {
        self.bits & pattern.bit() > 0
    }
}

/// Registry resolving entity types to their memoized caching policies.
///
/// The pattern set is computed once per type on first lookup and cached;
/// subsequent lookups never re-inspect the declaration. The registry is
/// read-mostly and safe to share across workers.
#[derive(Default)]
pub struct PolicyRegistry {
    entries: DashMap<TypeId, ResolvedPolicy>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        PolicyRegistry {
            entries: DashMap::new(),
        }
    }

    /// Resolve the memoized policy view for `E`.
    pub fn resolve<E: CacheEntity>(&self) -> ResolvedPolicy {
        *self
            .entries
            .entry(TypeId::of::<E>())
            .or_insert_with(|| {
                let policy = E::caching_policy();
                let resolved = ResolvedPolicy {
                    bits: policy.bits(),
                    format: policy.format(),
                    ttl: policy.ttl(),
                    prefix: policy.prefix_override().unwrap_or_else(E::cache_prefix),
                };
                debug!(
                    "Resolved caching policy for {}: bits={:#05b} format={} prefix={}",
                    E::entity_name(),
                    resolved.bits,
                    resolved.format,
                    resolved.prefix
                );
                resolved
            })
            .value()
    }

    /// Whether Cache-Aside is enabled for `E`.
    pub fn has_cache_aside<E: CacheEntity>(&self) -> bool {
        self.resolve::<E>().has(CachingPattern::CacheAside)
    }

    /// Whether Refresh-Ahead is enabled for `E`.
    pub fn has_refresh_ahead<E: CacheEntity>(&self) -> bool {
        self.resolve::<E>().has(CachingPattern::RefreshAhead)
    }

    /// Whether Write-Behind is enabled for `E`.
    pub fn has_write_behind<E: CacheEntity>(&self) -> bool {
        self.resolve::<E>().has(CachingPattern::WriteBehind)
    }

    /// Effective cache namespace for `E`.
    pub fn prefix<E: CacheEntity>(&self) -> &'static str {
        self.resolve::<E>().prefix
    }

    /// Cache entry TTL for `E`, if expiration is configured.
    pub fn ttl<E: CacheEntity>(&self) -> Option<Duration> {
        self.resolve::<E>().ttl
    }
}
