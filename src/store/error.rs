//! Error types for settings persistence.

use thiserror::Error;

/// Errors that can occur while reading or writing preferences.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backing storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored value could not be decoded.
    #[error("Invalid stored value for {key}: {reason}")]
    InvalidValue {
        /// The key whose value was rejected.
        key: String,
        /// Why decoding failed.
        reason: String,
    },

    /// The key cannot be mapped to a storage location.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for settings persistence.
pub type StoreResult<T> = Result<T, StoreError>;
