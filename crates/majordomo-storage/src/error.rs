//! Storage error types.

use majordomo_core::FleetError;
use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connecting to (or initializing) the engine failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A query failed.
    #[error("query error: {0}")]
    Query(String),

    /// A row could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The requested row does not exist.
    #[error("no such row: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("duplicate: {0}")]
    Duplicate(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(e: surrealdb::Error) -> Self {
        Self::Query(e.to_string())
    }
}

impl From<StorageError> for FleetError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => Self::not_found(what),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
