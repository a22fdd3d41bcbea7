//! Error types for the knowledge retrieval core.
//!
//! The core distinguishes between failures that are absorbed locally (missing or
//! corrupt data files, dimension drift of a persisted index) and failures that must
//! reach the caller (embedding failures and unrecoverable persist failures). Only
//! the latter ever show up as a [`KnowledgeError`].

use thiserror::Error;

/// Failures of the flat similarity index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index dimension must be non-zero")]
    ZeroDimension,

    /// The persisted index could not be read back. Callers rebuild instead of
    /// surfacing this to the end user.
    #[error("index file is corrupt: {0}")]
    Corrupt(String),

    #[error("index encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by an embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model error: {0}")]
    Model(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("embedding model download failed: {0}")]
    Download(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<candle_core::Error> for EmbeddingError {
    fn from(err: candle_core::Error) -> Self {
        EmbeddingError::Model(err.to_string())
    }
}

/// Errors surfaced by the knowledge retrieval engine.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// The embedding provider failed. The previous index stays authoritative.
    #[error("embedding provider failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The provider returned vectors whose width differs from the engine dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The provider returned a different number of vectors than texts submitted.
    #[error("embedding provider returned {actual} vectors for {expected} texts")]
    VectorCount { expected: usize, actual: usize },

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("failed to persist {what}: {source}")]
    Persist {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = KnowledgeError> = std::result::Result<T, E>;
