//! Selection audit trail
//!
//! Writes one append-only row per scored candidate — accepted or rejected —
//! with the scores and thresholds in force at evaluation time. Recording is
//! off the caller's critical path: a failed write is logged and observable
//! through the returned handle, but never fails the retrieval or analysis
//! operation that triggered it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use crate::storage::Database;

use super::engine::{ScoredCandidate, SelectionMetadata};

/// Stored chunk text excerpt bound
const CHUNK_EXCERPT_MAX: usize = 500;
/// Stored query text excerpt bound
const QUERY_EXCERPT_MAX: usize = 200;

/// One append-only audit row
#[derive(Debug, Clone)]
pub struct ChunkSelectionRecord {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: usize,
    pub chunk_excerpt: String,
    pub query_excerpt: String,
    pub vector_score: f32,
    pub lexical_score: f32,
    pub hybrid_score: f32,
    pub min_similarity_threshold: f32,
    pub min_hybrid_threshold: f32,
    pub operation_type: String,
    pub operation_subtype: Option<String>,
    pub was_selected: bool,
    pub rejection_reason: Option<String>,
    pub rank_position: usize,
    pub recorded_at: DateTime<Utc>,
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Builds and persists selection records
pub struct SelectionAuditor {
    database: Arc<Database>,
}

impl SelectionAuditor {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Build the audit rows for one search outcome
    pub fn records_for(
        candidates: &[ScoredCandidate],
        metadata: &SelectionMetadata,
        query_text: &str,
        operation_type: &str,
        operation_subtype: Option<&str>,
    ) -> Vec<ChunkSelectionRecord> {
        let now = Utc::now();
        candidates
            .iter()
            .map(|c| ChunkSelectionRecord {
                chunk_id: c.chunk.id,
                document_id: c.chunk.document_id,
                chunk_index: c.chunk.index,
                chunk_excerpt: truncate_chars(&c.chunk.text, CHUNK_EXCERPT_MAX),
                query_excerpt: truncate_chars(query_text, QUERY_EXCERPT_MAX),
                vector_score: c.vector_score,
                lexical_score: c.lexical_score,
                hybrid_score: c.hybrid_score,
                min_similarity_threshold: metadata.min_similarity_threshold,
                min_hybrid_threshold: metadata.min_hybrid_threshold,
                operation_type: operation_type.to_string(),
                operation_subtype: operation_subtype.map(str::to_string),
                was_selected: c.accepted,
                rejection_reason: (!c.accepted).then(|| "Below both thresholds".to_string()),
                rank_position: c.rank,
                recorded_at: now,
            })
            .collect()
    }

    /// Record a search outcome on a spawned task.
    ///
    /// Returns the task handle so callers can observe completion; dropping
    /// it keeps fire-and-forget semantics.
    pub fn record_detached(
        &self,
        candidates: &[ScoredCandidate],
        metadata: &SelectionMetadata,
        query_text: &str,
        operation_type: &str,
        operation_subtype: Option<&str>,
    ) -> JoinHandle<()> {
        let records = Self::records_for(
            candidates,
            metadata,
            query_text,
            operation_type,
            operation_subtype,
        );
        let database = self.database.clone();
        let operation = operation_type.to_string();

        tokio::spawn(async move {
            if records.is_empty() {
                return;
            }
            let count = records.len();
            match database.insert_selection_records(&records) {
                Ok(()) => debug!(count, operation, "chunk selection recorded"),
                Err(e) => error!(operation, error = %e, "failed to record chunk selection"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DocumentFacts;
    use crate::storage::StoredChunk;

    fn candidate(accepted: bool, rank: usize, text: &str) -> ScoredCandidate {
        ScoredCandidate {
            chunk: StoredChunk {
                id: Uuid::new_v4(),
                document_id: Uuid::new_v4(),
                text: text.to_string(),
                index: rank - 1,
                start_offset: 0,
                end_offset: text.len(),
            },
            facts: DocumentFacts::default(),
            vector_score: 0.4,
            lexical_score: 0.02,
            hybrid_score: 0.25,
            accepted,
            rank,
        }
    }

    fn metadata() -> SelectionMetadata {
        SelectionMetadata {
            total_candidates: 2,
            selected_count: 1,
            rejected_count: 1,
            min_similarity_threshold: 0.3,
            min_hybrid_threshold: 0.25,
            detected_entities: Vec::new(),
        }
    }

    #[test]
    fn test_records_capture_scores_and_outcome() {
        let candidates = vec![candidate(true, 1, "aceptado"), candidate(false, 2, "rechazado")];
        let records = SelectionAuditor::records_for(
            &candidates,
            &metadata(),
            "consulta de prueba",
            "chat",
            Some("vault_query"),
        );

        assert_eq!(records.len(), 2);
        assert!(records[0].was_selected);
        assert!(records[0].rejection_reason.is_none());
        assert!(!records[1].was_selected);
        assert_eq!(
            records[1].rejection_reason.as_deref(),
            Some("Below both thresholds")
        );
        assert_eq!(records[1].rank_position, 2);
        assert_eq!(records[0].operation_type, "chat");
        assert_eq!(records[0].operation_subtype.as_deref(), Some("vault_query"));
    }

    #[test]
    fn test_excerpts_are_bounded() {
        let long_text = "x".repeat(2000);
        let candidates = vec![candidate(true, 1, &long_text)];
        let long_query = "q".repeat(1000);
        let records =
            SelectionAuditor::records_for(&candidates, &metadata(), &long_query, "chat", None);

        assert_eq!(records[0].chunk_excerpt.chars().count(), 500);
        assert_eq!(records[0].query_excerpt.chars().count(), 200);
    }

    #[tokio::test]
    async fn test_detached_write_persists() {
        let database = Arc::new(Database::in_memory().unwrap());
        let auditor = SelectionAuditor::new(database.clone());
        let candidates = vec![candidate(true, 1, "texto"), candidate(false, 2, "texto")];

        let handle = auditor.record_detached(&candidates, &metadata(), "consulta", "search", None);
        handle.await.unwrap();

        assert_eq!(database.selection_record_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_candidates_write_nothing() {
        let database = Arc::new(Database::in_memory().unwrap());
        let auditor = SelectionAuditor::new(database.clone());

        let handle = auditor.record_detached(&[], &metadata(), "consulta", "search", None);
        handle.await.unwrap();

        assert_eq!(database.selection_record_count().unwrap(), 0);
    }
}
