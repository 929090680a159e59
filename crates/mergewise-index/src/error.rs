//! Error types for mergewise-index.

use std::num::TryFromIntError;

use crate::source::SourceError;
use crate::storage::StorageError;

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading local files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// LLM provider error (embedding).
    #[error("LLM error: {0}")]
    Llm(#[from] mergewise_llm::LlmError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Repository content provider error.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Persistence medium error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Vector length does not match the index dimension.
    #[error("dimension mismatch: index holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector contains NaN or infinite components.
    #[error("vector for {0} has non-finite components")]
    NonFiniteVector(String),

    /// Persisted snapshot failed validation.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Malformed `owner/name` repository key.
    #[error("invalid repository key {0:?}")]
    InvalidRepositoryKey(String),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
