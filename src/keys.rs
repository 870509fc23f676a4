//! Key and name derivation for streams, consumer groups, retry counters,
//! and cache entries.
//!
//! All names produced here are part of the crate's stable wire surface:
//!
//! | Resource        | Format                                    |
//! |-----------------|-------------------------------------------|
//! | Entity stream   | `wb:stream:entity:<entity>`               |
//! | DLQ stream      | `wb:stream:entity:<entity>:dlq`           |
//! | Consumer group  | `<store>_group`                           |
//! | Consumer        | `<entity>_<store>_consumer`               |
//! | Retry counter   | `<stream>:<entry-id>`                     |
//! | Cache entry     | `<prefix>:<id>`                           |

use crate::entity::CacheEntity;
use std::fmt::Display;

/// Field holding the serialized payload (or the textual id for deletes) in a
/// stream entry.
pub const EVENT_CONTENT_KEY: &str = "content";
/// Field holding the operation of a stream entry.
pub const EVENT_OPERATION_KEY: &str = "operation";

/// Separator used in keys.
pub const KEY_SEPARATOR: &str = ":";
/// Separator used in derived names.
pub const VALUE_SEPARATOR: &str = "_";

const STREAM_KEY_PREFIX: &str = "wb:stream:entity:";
const STREAM_KEY_DLQ_SUFFIX: &str = ":dlq";

const CONSUMER_GROUP_SUFFIX: &str = "_group";
const CONSUMER_SUFFIX: &str = "_consumer";

/// Stream key carrying write-behind intents for `E`.
pub fn stream_key<E: CacheEntity>() -> String {
    format!("{}{}", STREAM_KEY_PREFIX, E::entity_name())
}

/// Dead-letter stream key for `E`.
pub fn dlq_stream_key<E: CacheEntity>() -> String {
    format!(
        "{}{}{}",
        STREAM_KEY_PREFIX,
        E::entity_name(),
        STREAM_KEY_DLQ_SUFFIX
    )
}

/// Consumer group name for a target store.
pub fn consumer_group(store_name: &str) -> String {
    format!("{}{}", store_name.to_lowercase(), CONSUMER_GROUP_SUFFIX)
}

/// Consumer name for an `(entity, store)` pair.
pub fn consumer_name<E: CacheEntity>(store_name: &str) -> String {
    format!(
        "{}{}{}{}",
        E::entity_name(),
        VALUE_SEPARATOR,
        store_name.to_lowercase(),
        CONSUMER_SUFFIX
    )
}

/// Retry counter key for a pending stream entry.
pub fn counter_key(stream_key: &str, entry_id: &str) -> String {
    format!("{}{}{}", stream_key, KEY_SEPARATOR, entry_id)
}

/// Cache key for an entity id under a namespace.
pub fn cache_key(prefix: &str, id: &dyn Display) -> String {
    format!("{}{}{}", prefix, KEY_SEPARATOR, id)
}

/// If `key` belongs to `prefix`'s namespace, return the id portion.
///
/// Used by the expiration listener to route expired keys back to the owning
/// entity's facade.
pub fn split_cache_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    rest.strip_prefix(KEY_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CachingPolicy;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    struct Employer {
        id: u64,
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
            CachingPolicy::default()
        }
    }

    #[test]
    fn test_stream_keys() {
        assert_eq!(stream_key::<Employer>(), "wb:stream:entity:employer");
        assert_eq!(
            dlq_stream_key::<Employer>(),
            "wb:stream:entity:employer:dlq"
        );
    }

    #[test]
    fn test_group_and_consumer_names() {
        assert_eq!(consumer_group("PgEmployerStore"), "pgemployerstore_group");
        assert_eq!(
            consumer_name::<Employer>("PgEmployerStore"),
            "employer_pgemployerstore_consumer"
        );
    }

    #[test]
    fn test_counter_key() {
        assert_eq!(
            counter_key("wb:stream:entity:employer", "1526919030474-55"),
            "wb:stream:entity:employer:1526919030474-55"
        );
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("employer", &7), "employer:7");
    }

    #[test]
    fn test_split_cache_key() {
        assert_eq!(split_cache_key("employer", "employer:7"), Some("7"));
        assert_eq!(
            split_cache_key("employer", "employer:550e8400-e29b-41d4-a716-446655440000"),
            Some("550e8400-e29b-41d4-a716-446655440000")
        );
        assert_eq!(split_cache_key("employer", "product:7"), None);
        assert_eq!(split_cache_key("employer", "employer"), None);
    }
}
