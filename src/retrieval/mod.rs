//! Hybrid retrieval
//!
//! Fuses vector similarity and lexical rank into one hybrid score, applies
//! threshold-based acceptance, optionally constrains candidates by detected
//! equipment entities, and records every scored candidate in the selection
//! audit trail.

mod auditor;
mod engine;
mod scoring;

pub use auditor::{ChunkSelectionRecord, SelectionAuditor};
pub use engine::{HybridRetriever, ScoredCandidate, SearchOptions, SearchOutcome, SelectionMetadata};
pub use scoring::{hybrid_score, passes_acceptance};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Query embedding failed: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    #[error("Store query failed: {0}")]
    Store(#[from] crate::storage::StoreError),

    #[error("Configuration read failed: {0}")]
    Config(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}
