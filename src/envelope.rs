//! Stream entry envelope: operations, intents, and dead-letter records.
//!
//! Every entry on an entity stream is a flat string→string map. The
//! recognized fields are [`EVENT_CONTENT_KEY`] (the serialized payload, or
//! the textual id for deletes) and [`EVENT_OPERATION_KEY`]. An absent
//! operation means create/update. Dead-letter records copy the original
//! fields and attach failure context.
//!
//! [`EVENT_CONTENT_KEY`]: crate::keys::EVENT_CONTENT_KEY
//! [`EVENT_OPERATION_KEY`]: crate::keys::EVENT_OPERATION_KEY

use crate::error::{Error, Result};
use crate::keys::{EVENT_CONTENT_KEY, EVENT_OPERATION_KEY};
use std::collections::HashMap;
use std::str::FromStr;

/// Operation carried by a stream intent.
///
/// The facade only produces `Delete` explicitly; create/update intents omit
/// the field. `Read` is accepted by the parser and reserved for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Entity creation.
    Create,
    /// Reserved; never produced by the facade.
    Read,
    /// Entity update.
    Update,
    /// Entity deletion; `content` holds the textual id.
    Delete,
}

impl Operation {
    /// Wire form of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Read => "READ",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match text.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Operation::Create),
            "READ" => Ok(Operation::Read),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(Error::BadPayload(format!(
                "unknown operation: {}",
                other
            ))),
        }
    }
}

/// A write-behind intent, the unit appended to an entity stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Intent {
    /// Serialized entity payload, or the textual id for deletes.
    pub content: String,
    /// Explicit operation; `None` means create/update.
    pub operation: Option<Operation>,
}

impl Intent {
    /// Create/update intent carrying the serialized entity.
    pub fn upsert(content: String) -> Self {
        Intent {
            content,
            operation: None,
        }
    }

    /// Delete intent carrying the textual id.
    pub fn delete(id: String) -> Self {
        Intent {
            content: id,
            operation: Some(Operation::Delete),
        }
    }

    /// Render the intent as stream entry fields.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![(EVENT_CONTENT_KEY.to_string(), self.content.clone())];
        if let Some(op) = self.operation {
            fields.push((EVENT_OPERATION_KEY.to_string(), op.as_str().to_string()));
        }
        fields
    }
}

/// A decoded stream entry as delivered to the processor.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEntry {
    /// Stream the entry was read from.
    pub stream_key: String,
    /// Server-assigned entry id.
    pub id: String,
    /// Flat field map.
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    /// Build an entry from its parts.
    pub fn new(stream_key: impl Into<String>, id: impl Into<String>) -> Self {
        StreamEntry {
            stream_key: stream_key.into(),
            id: id.into(),
            fields: HashMap::new(),
        }
    }

    /// Set a field, builder style.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// The entry's payload field, if present.
    ///
    /// Bootstrap `{init:"true"}` records have no content and are skipped by
    /// the processor.
    pub fn content(&self) -> Option<&str> {
        self.fields.get(EVENT_CONTENT_KEY).map(String::as_str)
    }

    /// Parse the entry's operation field.
    ///
    /// # Errors
    /// Returns `Error::BadPayload` when the field is present but unknown.
    pub fn operation(&self) -> Result<Option<Operation>> {
        match self.fields.get(EVENT_OPERATION_KEY) {
            Some(text) => text.parse().map(Some),
            None => Ok(None),
        }
    }

    /// Log the entry at debug level for diagnostics.
    pub fn dump(&self) {
        debug!("Stream key: {}", self.stream_key);
        debug!("Entry id: {}", self.id);
        debug!("Entry.content: {:?}", self.fields.get(EVENT_CONTENT_KEY));
        debug!(
            "Entry.operation: {:?}",
            self.fields.get(EVENT_OPERATION_KEY)
        );
    }
}

/// A record bound for the dead-letter stream: the original entry's fields
/// plus failure context.
#[derive(Clone, Debug)]
pub struct DeadLetterRecord {
    fields: Vec<(String, String)>,
}

impl DeadLetterRecord {
    /// Build a dead-letter record from a failed entry.
    pub fn from_entry(
        entry: &StreamEntry,
        reason: &str,
        error: &str,
        consumer: &str,
        group: &str,
    ) -> Self {
        let mut fields: Vec<(String, String)> = entry
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        fields.push(("reason".to_string(), reason.to_string()));
        fields.push(("error".to_string(), error.to_string()));
        fields.push(("streamKey".to_string(), entry.stream_key.clone()));
        fields.push(("streamID".to_string(), entry.id.clone()));
        fields.push(("consumer".to_string(), consumer.to_string()));
        fields.push(("group".to_string(), group.to_string()));
        DeadLetterRecord { fields }
    }

    /// The record's fields, ready for an XADD.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Failure classification, e.g. `"Too many attempts"`.
    pub fn reason(&self) -> Option<&str> {
        self.get("reason")
    }

    /// Diagnostic error string.
    pub fn error(&self) -> Option<&str> {
        self.get("error")
    }

    /// Id of the original stream entry.
    pub fn stream_id(&self) -> Option<&str> {
        self.get("streamID")
    }
}
