//! Storage: the vector+lexical store contract and the relational sidecar
//!
//! The engine treats the vector store as an opaque collaborator: it must be
//! able to score candidates by vector distance and lexical rank in a single
//! query. [`MemoryStore`] is the bundled reference implementation. Runtime
//! configuration, the selection audit trail, and analysis runs live in a
//! SQLite sidecar managed by [`Database`].

mod database;
mod memory;

pub use database::{ConfigChangeRecord, Database, DbStats};
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::metadata::{ChunkMetadata, DocumentFacts, IngestionStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A persisted chunk, the unit of retrieval
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub text: String,
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// One chunk plus its embedding and metadata, as written at ingestion
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk: StoredChunk,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// A candidate returned by [`VectorStore::hybrid_query`], carrying both raw
/// scores computed store-side
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub chunk: StoredChunk,
    pub facts: DocumentFacts,
    /// Similarity derived from vector distance, higher is better, ~0..1
    pub vector_score: f32,
    /// Lexical rank statistic, unbounded above but typically small
    pub lexical_score: f32,
}

/// Parameters of one hybrid store query
#[derive(Debug)]
pub struct HybridQuery<'a> {
    pub embedding: &'a [f32],
    pub text: &'a str,
    /// Restrict candidates to one document
    pub document_id: Option<Uuid>,
    /// Restrict candidates to vault documents
    pub vault_only: bool,
    /// When non-empty, candidates must match at least one variant in their
    /// equipment or manufacturer facts (case-insensitive substring)
    pub entity_variants: &'a [String],
    /// Maximum number of candidates to return
    pub limit: usize,
}

/// The vector+lexical store collaborator.
///
/// Implementations must return, per row, a vector similarity and a lexical
/// rank from one query; score fusion and acceptance happen in the retrieval
/// engine. A store query failure fails the whole search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append a batch of chunk records. Batches of one document arrive in
    /// chunk-index order.
    async fn append_chunks(&self, records: Vec<ChunkRecord>) -> Result<(), StoreError>;

    /// Remove all chunks of a document, returning how many were removed.
    /// Re-ingestion replaces a document's rows as a unit through this call.
    async fn delete_document(&self, document_id: Uuid) -> Result<usize, StoreError>;

    /// Score candidates against the query in one pass
    async fn hybrid_query(&self, query: HybridQuery<'_>) -> Result<Vec<CandidateRow>, StoreError>;

    /// Rewrite the document-level facts on every chunk of a document,
    /// returning how many chunks were touched. Always a whole-document
    /// operation, never partial.
    async fn update_document_facts(
        &self,
        document_id: Uuid,
        facts: DocumentFacts,
    ) -> Result<usize, StoreError>;

    /// Persist the ingestion status of a document
    async fn set_ingestion_status(
        &self,
        document_id: Uuid,
        status: IngestionStatus,
    ) -> Result<(), StoreError>;

    /// Read the ingestion status of a document
    async fn ingestion_status(
        &self,
        document_id: Uuid,
    ) -> Result<Option<IngestionStatus>, StoreError>;
}
