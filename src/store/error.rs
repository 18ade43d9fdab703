//! Storage error types

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store writer lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
