//! Document ingestion pipeline
//!
//! Chunks a document with the currently configured strategy, embeds the
//! chunks in fixed-size batches, and persists them batch by batch in strict
//! order. A later batch failing leaves earlier batches in place; recovery is
//! re-ingestion, which replaces the document's rows as a unit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chunking::{chunker_for_method, TextChunk};
use crate::config::ConfigStore;
use crate::error::{Result, TecvaultError};
use crate::metadata::{build_chunk_metadata, DocumentFacts, IngestionStatus};
use crate::storage::{ChunkRecord, StoredChunk, VectorStore};

use super::{estimate_tokens, EmbeddingError, EmbeddingProvider};

/// Chunks embedded per provider round-trip. Internal constant, bounds the
/// request payload size.
const EMBED_BATCH_SIZE: usize = 10;

/// Wall-clock ceiling for one document's ingestion
const INGESTION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Summary of one completed ingestion
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: Uuid,
    pub chunk_count: usize,
    pub tokens_used: usize,
    pub duration_ms: u64,
}

/// Chunk-embed-persist pipeline over the configured providers and store
pub struct IngestionPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    config: Arc<ConfigStore>,
    timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            provider,
            store,
            config,
            timeout: INGESTION_TIMEOUT,
        }
    }

    /// Override the ingestion ceiling (tests use a short one)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ingest a document: chunk, embed, persist.
    ///
    /// The document's persisted status moves processing → completed, or
    /// failed with the error text. On timeout the document is forced into
    /// failed even if embedding work is still nominally in flight.
    pub async fn ingest(
        &self,
        document_id: Uuid,
        text: &str,
        facts: DocumentFacts,
    ) -> Result<IngestReport> {
        info!(%document_id, "starting document ingestion");
        self.store
            .set_ingestion_status(document_id, IngestionStatus::Processing)
            .await
            .map_err(TecvaultError::Store)?;

        match timeout(self.timeout, self.ingest_inner(document_id, text, facts)).await {
            Ok(Ok(report)) => {
                self.store
                    .set_ingestion_status(document_id, IngestionStatus::Completed)
                    .await
                    .map_err(TecvaultError::Store)?;
                info!(
                    %document_id,
                    chunks = report.chunk_count,
                    duration_ms = report.duration_ms,
                    "document ingestion completed"
                );
                Ok(report)
            }
            Ok(Err(e)) => {
                error!(%document_id, error = %e, "document ingestion failed");
                self.mark_failed(document_id, &e.to_string()).await;
                Err(e)
            }
            Err(_) => {
                let message = format!("Ingestion timed out after {:?}", self.timeout);
                error!(%document_id, message, "document ingestion timed out");
                self.mark_failed(document_id, &message).await;
                Err(TecvaultError::IngestionTimeout {
                    document_id,
                    timeout: self.timeout,
                })
            }
        }
    }

    async fn mark_failed(&self, document_id: Uuid, message: &str) {
        if let Err(status_err) = self
            .store
            .set_ingestion_status(document_id, IngestionStatus::Failed(message.to_string()))
            .await
        {
            warn!(%document_id, error = %status_err, "failed to persist failed status");
        }
    }

    async fn ingest_inner(
        &self,
        document_id: Uuid,
        text: &str,
        facts: DocumentFacts,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        let params = self.config.retrieval_params().await?;

        // Bad window parameters must fail before any chunk is produced
        let chunker = chunker_for_method(
            &params.chunking_method,
            params.chunk_size,
            params.chunk_overlap,
        )?;
        let chunks = chunker.chunk(text);

        if chunks.is_empty() {
            return Err(TecvaultError::Embedding(EmbeddingError::InvalidInput(
                "Document produced no chunks".to_string(),
            )));
        }

        info!(%document_id, chunks = chunks.len(), method = chunker.name(), "document chunked");

        // Re-ingestion replaces the document's rows as a unit
        self.store
            .delete_document(document_id)
            .await
            .map_err(TecvaultError::Store)?;

        let mut tokens_used = 0usize;
        let mut persisted = 0usize;

        // Batches run strictly in order: batch i is persisted before batch
        // i+1 starts, so chunk indexes stay meaningful for overlap analysis.
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.provider.embed_batch(&texts).await?;

            if embeddings.len() != batch.len() {
                return Err(TecvaultError::Embedding(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: embeddings.len(),
                }));
            }

            let records: Vec<ChunkRecord> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| {
                    let token_estimate = estimate_tokens(&chunk.text);
                    tokens_used += token_estimate;
                    self.record_for(document_id, &facts, chunk, chunker.name(), token_estimate, embedding)
                })
                .collect();

            self.store
                .append_chunks(records)
                .await
                .map_err(TecvaultError::Store)?;
            persisted += batch.len();
        }

        // One cost record per ingestion, not per chunk
        info!(
            %document_id,
            tokens = tokens_used,
            model = self.provider.model_name(),
            "embedding token cost"
        );

        Ok(IngestReport {
            document_id,
            chunk_count: persisted,
            tokens_used,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn record_for(
        &self,
        document_id: Uuid,
        facts: &DocumentFacts,
        chunk: &TextChunk,
        method: &str,
        token_estimate: usize,
        embedding: Vec<f32>,
    ) -> ChunkRecord {
        ChunkRecord {
            chunk: StoredChunk {
                id: Uuid::new_v4(),
                document_id,
                text: chunk.text.clone(),
                index: chunk.index,
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
            },
            metadata: build_chunk_metadata(
                facts,
                chunk,
                method,
                token_estimate,
                self.provider.model_name(),
            ),
            embedding,
        }
    }
}
