use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the tecvault engine
#[derive(Error, Debug)]
pub enum TecvaultError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Per-key configuration validation failures collected into one error
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Chunking parameter or execution errors
    #[error(transparent)]
    Chunking(#[from] crate::chunking::ChunkingError),

    /// Embedding provider errors
    #[error(transparent)]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Retrieval errors
    #[error(transparent)]
    Retrieval(#[from] crate::retrieval::RetrievalError),

    /// Generation provider errors
    #[error(transparent)]
    Generation(#[from] crate::generation::GenerationError),

    /// Vector store errors
    #[error(transparent)]
    Store(#[from] crate::storage::StoreError),

    /// Whole-document ingestion exceeded its wall-clock ceiling
    #[error("Ingestion of document {document_id} timed out after {timeout:?}")]
    IngestionTimeout { document_id: Uuid, timeout: Duration },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Configuration key that failed validation
    pub key: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result type for tecvault operations
pub type Result<T> = std::result::Result<T, TecvaultError>;
