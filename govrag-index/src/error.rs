//! Error types for the `govrag-index` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building, loading, or querying the policy index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Reading or writing a file of the persisted index failed.
    #[error("Index storage error at {}: {source}", path.display())]
    StorageError {
        /// The file or directory being accessed.
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The index could not be encoded for persistence.
    #[error("Index serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The index was queried before a generation was built or loaded.
    #[error("Index not ready: call ensure_fresh before querying")]
    NotReady,
}

impl IndexError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageError { path: path.into(), source }
    }
}

/// A convenience result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
