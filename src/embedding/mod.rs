//! Embedding generation
//!
//! The embedding model is consumed as a black-box service behind
//! [`EmbeddingProvider`]. [`IngestionPipeline`] drives the full
//! chunk-embed-persist path for a document.

mod pipeline;
mod remote;

pub use pipeline::{IngestReport, IngestionPipeline};
pub use remote::RemoteEmbeddingProvider;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Allows abstraction over different embedding backends; the engine only
/// assumes fixed dimensionality per model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts in one request
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embedding dimension
    fn dimension(&self) -> usize;

    /// Model identifier
    fn model_name(&self) -> &str;
}

/// Approximate token count from character length.
///
/// ~3.5 characters per token for mixed Spanish/English technical text.
/// Deliberately rough; it only feeds cost accounting.
pub fn estimate_tokens(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }
    (text.chars().count() as f64 / 3.5).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   "), 0);
    }

    #[test]
    fn test_estimate_tokens_scales_with_length() {
        assert_eq!(estimate_tokens("a".repeat(35).as_str()), 10);
        assert_eq!(estimate_tokens("a".repeat(36).as_str()), 11);
    }
}
