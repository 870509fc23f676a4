//! Per-entity cache store adapter.
//!
//! Wraps a [`CacheBackend`] with the entity's resolved policy: keys are
//! `<prefix>:<id>`, values are encoded per the declared [`CachingFormat`],
//! and writes carry the policy TTL when one is configured.

use crate::backend::CacheBackend;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::keys::cache_key;
use crate::policy::{CachingFormat, PolicyRegistry, ResolvedPolicy};
use std::collections::HashMap;
use std::marker::PhantomData;

/// Encode an entity as a flat field map for hash storage.
///
/// Non-string fields are stored as their JSON text. String fields are
/// stored raw unless their content itself parses as JSON, in which case
/// they are stored quoted so the decoder stays unambiguous.
pub(crate) fn encode_fields<E: CacheEntity>(entity: &E) -> Result<HashMap<String, String>> {
    let value = serde_json::to_value(entity)?;
    let object = value.as_object().ok_or_else(|| {
        Error::BadPayload(format!(
            "entity {} does not serialize to an object",
            E::entity_name()
        ))
    })?;

    let mut fields = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let text = match value.as_str() {
            Some(s) if serde_json::from_str::<serde_json::Value>(s).is_err() => s.to_string(),
            _ => value.to_string(),
        };
        fields.insert(key.clone(), text);
    }
    Ok(fields)
}

/// Decode an entity from a flat field map.
///
/// Each field is interpreted as JSON text, falling back to a raw string.
pub(crate) fn decode_fields<E: CacheEntity>(fields: &HashMap<String, String>) -> Result<E> {
    let mut parsed = serde_json::Map::with_capacity(fields.len());
    for (key, text) in fields {
        let value = serde_json::from_str::<serde_json::Value>(text)
            .unwrap_or_else(|_| serde_json::Value::String(text.clone()));
        parsed.insert(key.clone(), value);
    }
    serde_json::from_value(serde_json::Value::Object(parsed)).map_err(|e| {
        Error::BadPayload(format!(
            "cannot decode {} from hash fields: {}",
            E::entity_name(),
            e
        ))
    })
}

/// Per-entity key/value cache facade.
///
/// Supports `find_by_id`, `save`, and `delete_by_id` with the entity's
/// declared encoding and TTL. This is the cache half of the cache-aside read
/// path; the facade owns the read-through logic.
#[derive(Clone)]
pub struct CacheStore<E: CacheEntity, B: CacheBackend> {
    backend: B,
    policy: ResolvedPolicy,
    _entity: PhantomData<E>,
}

impl<E: CacheEntity, B: CacheBackend> CacheStore<E, B> {
    /// Create the adapter, resolving the entity's policy once.
    pub fn new(backend: B, registry: &PolicyRegistry) -> Self {
        CacheStore {
            backend,
            policy: registry.resolve::<E>(),
            _entity: PhantomData,
        }
    }

    /// Cache key for an id under this entity's namespace.
    pub fn key_for(&self, id: &E::Key) -> String {
        cache_key(self.policy.prefix, id)
    }

    /// Look up an entity in the cache.
    ///
    /// # Errors
    /// Returns `Error::CacheUnavailable` when the backend fails and
    /// `Error::BadPayload` when a stored entry cannot be decoded.
    pub async fn find_by_id(&self, id: &E::Key) -> Result<Option<E>> {
        let key = self.key_for(id);
        match self.policy.format {
            CachingFormat::Json => match self.backend.get_value(&key).await? {
                Some(text) => {
                    let entity = serde_json::from_str(&text)?;
                    Ok(Some(entity))
                }
                None => Ok(None),
            },
            CachingFormat::Hash => match self.backend.get_fields(&key).await? {
                Some(fields) => decode_fields(&fields).map(Some),
                None => Ok(None),
            },
        }
    }

    /// Write an entity to the cache, applying the policy TTL.
    ///
    /// # Errors
    /// Returns `Error::BadPayload` for encoding failures and
    /// `Error::CacheUnavailable` for backend failures.
    pub async fn save(&self, entity: E) -> Result<E> {
        let key = cache_key(self.policy.prefix, &entity.cache_key());
        match self.policy.format {
            CachingFormat::Json => {
                let text = serde_json::to_string(&entity)?;
                self.backend.put_value(&key, text, self.policy.ttl).await?;
            }
            CachingFormat::Hash => {
                let fields = encode_fields(&entity)?;
                self.backend.put_fields(&key, fields, self.policy.ttl).await?;
            }
        }
        debug!("Entity written to cache: {}", key);
        Ok(entity)
    }

    /// Remove an entity from the cache.
    ///
    /// # Errors
    /// Returns `Error::CacheUnavailable` for backend failures.
    pub async fn delete_by_id(&self, id: &E::Key) -> Result<()> {
        let key = self.key_for(id);
        self.backend.delete(&key).await?;
        debug!("Entity deleted from cache: {}", key);
        Ok(())
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}
