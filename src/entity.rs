//! Core entity trait that all cached entities must implement.

use crate::policy::CachingPolicy;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;

/// Trait that all entities managed by cacheflow must implement.
///
/// An entity declares its identifier type, a stable lower-case name used for
/// stream and consumer naming, an optional cache namespace, and the caching
/// policy that selects which patterns apply to it.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use cacheflow::{CacheEntity, CachingFormat, CachingPattern, CachingPolicy};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// pub struct Employer {
///     pub id: u64,
///     pub name: String,
/// }
///
/// impl CacheEntity for Employer {
///     type Key = u64;
///
///     fn cache_key(&self) -> Self::Key {
///         self.id
///     }
///
///     fn entity_name() -> &'static str {
///         "employer"
///     }
///
///     fn caching_policy() -> CachingPolicy {
///         CachingPolicy::new(&[CachingPattern::CacheAside, CachingPattern::WriteBehind])
///             .with_format(CachingFormat::Json)
///             .with_ttl_seconds(60)
///     }
/// }
/// ```
pub trait CacheEntity:
    Send + Sync + Serialize + for<'de> Deserialize<'de> + Clone + 'static
{
    /// Type of the entity's identifier.
    ///
    /// Must round-trip through its string form: stream intents carry ids as
    /// text, and the processor parses them back with `FromStr`. `String`,
    /// `uuid::Uuid`, and the integer types all qualify.
    type Key: Display + FromStr + Clone + Send + Sync + Eq + Hash + 'static;

    /// Return the entity's unique identifier.
    fn cache_key(&self) -> Self::Key;

    /// Stable lower-case name for this entity type.
    ///
    /// Used to derive the stream key (`wb:stream:entity:<name>`), the DLQ
    /// stream key, and consumer names. Must not change across releases while
    /// streams for this entity are live.
    fn entity_name() -> &'static str;

    /// Cache namespace for this entity type.
    ///
    /// Final cache key format: `"{prefix}:{key}"`. Defaults to
    /// [`entity_name`](CacheEntity::entity_name).
    fn cache_prefix() -> &'static str {
        Self::entity_name()
    }

    /// Declared caching policy for this entity type.
    ///
    /// Evaluated once per process by the [`PolicyRegistry`]; subsequent
    /// pattern checks read the memoized bitset.
    ///
    /// [`PolicyRegistry`]: crate::policy::PolicyRegistry
    fn caching_policy() -> CachingPolicy {
        CachingPolicy::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CachingPattern;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    struct TestEntity {
        id: String,
        value: String,
    }

    impl CacheEntity for TestEntity {
        type Key = String;

        fn cache_key(&self) -> Self::Key {
            self.id.clone()
        }

        fn entity_name() -> &'static str {
            "test"
        }
    }

    #[derive(Clone, Serialize, Deserialize)]
    struct Prefixed {
        id: u32,
    }

    impl CacheEntity for Prefixed {
        type Key = u32;

        fn cache_key(&self) -> Self::Key {
            self.id
        }

        fn entity_name() -> &'static str {
            "prefixed"
        }

        fn cache_prefix() -> &'static str {
            "custom-ns"
        }

        fn caching_policy() -> CachingPolicy {
            CachingPolicy::new(&[CachingPattern::CacheAside])
        }
    }

    #[test]
    fn test_cache_key_and_name() {
        let entity = TestEntity {
            id: "entity_123".to_string(),
            value: "test".to_string(),
        };

        assert_eq!(entity.cache_key(), "entity_123");
        assert_eq!(TestEntity::entity_name(), "test");
        assert_eq!(TestEntity::cache_prefix(), "test");
    }

    #[test]
    fn test_default_policy_has_no_patterns() {
        let policy = TestEntity::caching_policy();
        assert!(policy.patterns().is_empty());
    }

    #[test]
    fn test_prefix_override() {
        assert_eq!(Prefixed::cache_prefix(), "custom-ns");
        assert_eq!(Prefixed::entity_name(), "prefixed");
    }

    #[test]
    fn test_integer_key_round_trips_through_text() {
        let entity = Prefixed { id: 42 };
        let text = entity.cache_key().to_string();
        let parsed: u32 = text.parse().expect("Failed to parse key");
        assert_eq!(parsed, 42);
    }
}
