//! Error types for the caching framework.

use std::fmt;

/// Result type for cacheflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the caching framework.
///
/// All operations return `Result<T>` where `Result` is defined as
/// `std::result::Result<T, Error>`. Different variants represent different
/// failure modes:
#[derive(Debug, Clone)]
pub enum Error {
    /// Payload could not be encoded or decoded.
    ///
    /// Raised by the facade when an entity cannot be serialized for the
    /// stream, and by the processor when an entry's `content` cannot be
    /// decoded (malformed JSON, unparseable id, unknown operation).
    ///
    /// **Recovery:** fatal for that entry; the reaper dead-letters it on its
    /// first visit.
    BadPayload(String),

    /// A primary store of record is unavailable or rejected the operation.
    ///
    /// Common causes:
    /// - Database connection lost
    /// - Query timeout
    /// - Constraint violation
    ///
    /// **Recovery:** the entry stays pending and is retried by the reaper;
    /// dead-lettered after the attempt limit.
    StoreUnavailable(String),

    /// The cache store is unavailable.
    ///
    /// Facade reads fall through to the primary store; cache writes become a
    /// logged no-op.
    CacheUnavailable(String),

    /// Aggregate failure while applying an entry to the bound stores.
    ///
    /// Every bound store is attempted before this is raised; the message
    /// joins the individual store failures.
    ProcessMessage(String),

    /// The group acknowledge for a processed entry failed.
    ///
    /// The entry remains pending and is re-driven by the reaper; after the
    /// attempt limit it is dead-lettered with reason "Long lasting message".
    AcknowledgeMessage(String),

    /// An entity's caching declaration is invalid.
    ///
    /// **Recovery:** fatal at registration; fix the declaration.
    PolicyMisconfigured(String),

    /// Backend error from the Redis-compatible server (connection, protocol,
    /// stream command failure).
    BackendError(String),

    /// Configuration error during initialization.
    ///
    /// Common causes:
    /// - Invalid connection string
    /// - Zero batch size or attempt limit
    ///
    /// **Recovery:** fix configuration and restart.
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadPayload(msg) => write!(f, "Bad payload: {}", msg),
            Error::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Error::CacheUnavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            Error::ProcessMessage(msg) => write!(f, "Process message error: {}", msg),
            Error::AcknowledgeMessage(msg) => {
                write!(f, "Acknowledge message error: {}", msg)
            }
            Error::PolicyMisconfigured(msg) => {
                write!(f, "Policy misconfigured: {}", msg)
            }
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::BadPayload(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(format!("Redis error: {}", e))
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}
