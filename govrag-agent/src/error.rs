//! Error types for the `govrag-agent` crate.

use std::path::PathBuf;

use govrag_index::IndexError;
use thiserror::Error;

/// Errors raised by the decision memory log.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Reading or appending the log file failed.
    #[error("Memory log I/O error at {}: {source}", path.display())]
    Io {
        /// The log file.
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A line of the log could not be decoded.
    #[error("Memory log {} is corrupt at line {line}: {source}", path.display())]
    Corrupt {
        /// The log file.
        path: PathBuf,
        /// One-based line number of the bad entry.
        line: usize,
        /// The decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// An entry could not be encoded.
    #[error("Memory entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a language-model backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The backend cannot be loaded or reached.
    #[error("Language model unavailable ({backend}): {message}")]
    Unavailable {
        /// The backend that could not be used.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The backend was reached but the request failed.
    #[error("Language model error ({backend}): {message}")]
    Backend {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },
}

/// A configuration validation error.
#[derive(Debug, Error)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);

/// Errors that end a workflow run in the failed state.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The action or context was missing or empty.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The policy document exists but could not be read.
    #[error("Cannot read policy document {}: {source}", path.display())]
    PolicyDocument {
        /// The policy document path.
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Building, loading, or querying the policy index failed.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Appending to the decision memory failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// The memory stage was reached without a decision.
    #[error("Workflow reached the memory stage without a decision")]
    MissingDecision,

    /// The engine could not be assembled.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A convenience result type for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;
