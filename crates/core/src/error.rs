//! Error types for the market brief assistant.
//!
//! This module defines a unified error enum covering configuration, I/O,
//! language-model, embedding, index, collaborator and request errors.

use thiserror::Error;

/// Unified error type for the market brief assistant.
///
/// All fallible functions return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Language-model provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding collaborator failures
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// An embedding did not have the dimension of the index
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A chunk id is already present in the index
    #[error("Duplicate chunk id: {0}")]
    DuplicateChunk(String),

    /// Persisted index state is missing, corrupt or incompatible
    #[error("Index load error: {0}")]
    IndexLoad(String),

    /// Retrieval service errors
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Market-data collaborator errors
    #[error("Market data error: {0}")]
    MarketData(String),

    /// Analysis collaborator errors
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Values that cannot be stored or serialized faithfully
    #[error("Validation error: {0}")]
    Validation(String),

    /// Structurally invalid requests
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
