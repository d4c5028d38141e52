//! Error types for BucketDB

use thiserror::Error;

/// Result type alias for BucketDB operations
pub type Result<T> = std::result::Result<T, TsError>;

/// BucketDB error types
#[derive(Error, Debug)]
pub enum TsError {
    /// Invalid collection configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Collection or backing-collection name collision
    #[error("Name collision: {0}")]
    NameCollision(String),

    /// Document is missing the configured time field
    #[error("Missing time field: {0}")]
    MissingTimeField(String),

    /// Time field holds a non-time value
    #[error("Invalid time type for field {field}: found {found}")]
    InvalidTimeType { field: String, found: String },

    /// Persisted bucket payload is malformed
    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),

    /// Checksum mismatch on a persisted payload
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Bucket flush to the backing collection failed
    #[error("Flush failed: {0}")]
    FlushFailed(String),

    /// Collection already exists
    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    /// Collection not found
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Underlying document store error
    #[error("Store error: {0}")]
    Store(String),
}

impl TsError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, TsError::FlushFailed(_) | TsError::Store(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TsError::CorruptPayload(_) | TsError::ChecksumMismatch { .. }
        )
    }
}
