//! Error types for the change feed.

use thiserror::Error;

/// Main error type for change feed operations.
#[derive(Clone, Debug, Error)]
pub enum FeedError {
    /// Cursor or connection dropped. Retried by the tailer, never fatal.
    #[error("Transient IO error: {0}")]
    TransientIo(String),

    #[error("Lookup failed for {namespace}/{id}: {reason}")]
    LookupFailure {
        namespace: String,
        id: String,
        reason: String,
    },

    #[error("Unsupported query path: {0}")]
    UnsupportedQueryPath(String),

    #[error("Unsupported query operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid namespace pattern: {0}")]
    InvalidPattern(String),

    #[error("Subscription tag already in use: {0}")]
    DuplicateTag(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Component already started")]
    AlreadyStarted,

    #[error("Component stopped")]
    Stopped,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            FeedError::Deserialization(e.to_string())
        } else {
            FeedError::Serialization(e.to_string())
        }
    }
}

impl From<rmp_serde::encode::Error> for FeedError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        FeedError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for FeedError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        FeedError::Deserialization(e.to_string())
    }
}

/// Result type for change feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
