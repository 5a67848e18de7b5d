//! In-memory [`VectorStore`] implementation
//!
//! Brute-force cosine similarity plus a query-term frequency rank over the
//! chunk text, behind `std::sync::RwLock`. Rows keep insertion order, which
//! gives the store's natural row order for tie-breaking. When more rows
//! survive filtering than the query limit, the densest candidates are kept
//! (vector-score prefilter) and returned in insertion order.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::metadata::{DocumentFacts, IngestionStatus};

use super::{CandidateRow, ChunkRecord, HybridQuery, StoreError, StoredChunk, VectorStore};

pub struct MemoryStore {
    rows: RwLock<Vec<ChunkRecord>>,
    statuses: RwLock<HashMap<Uuid, IngestionStatus>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.rows.read().unwrap().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        (dot / (mag_a * mag_b)).max(0.0)
    }
}

/// Term-frequency rank of the query terms over the chunk text. Small values,
/// comparable to a full-text rank statistic.
fn lexical_rank(query: &str, text: &str) -> f32 {
    let haystack = text.to_lowercase();
    let words = haystack.split_whitespace().count().max(1);

    let mut hits = 0usize;
    for term in query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
    {
        hits += haystack.matches(term).count();
    }

    hits as f32 / words as f32
}

fn matches_entity_filter(facts: &DocumentFacts, variants: &[String]) -> bool {
    if variants.is_empty() {
        return true;
    }
    let equipment = facts.equipment.as_deref().unwrap_or("").to_lowercase();
    let manufacturer = facts.manufacturer.as_deref().unwrap_or("").to_lowercase();

    variants.iter().any(|v| {
        let v = v.to_lowercase();
        equipment.contains(&v) || manufacturer.contains(&v)
    })
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn append_chunks(&self, records: Vec<ChunkRecord>) -> Result<(), StoreError> {
        let mut rows = self.rows.write().unwrap();
        if let (Some(first), Some(existing)) = (records.first(), rows.first()) {
            if first.embedding.len() != existing.embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: existing.embedding.len(),
                    actual: first.embedding.len(),
                });
            }
        }
        rows.extend(records);
        Ok(())
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|r| r.chunk.document_id != document_id);
        Ok(before - rows.len())
    }

    async fn hybrid_query(&self, query: HybridQuery<'_>) -> Result<Vec<CandidateRow>, StoreError> {
        let rows = self.rows.read().unwrap();

        // (insertion position, candidate) so order can be restored after the
        // prefilter truncation
        let mut candidates: Vec<(usize, CandidateRow)> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                query
                    .document_id
                    .map_or(true, |id| r.chunk.document_id == id)
            })
            .filter(|(_, r)| !query.vault_only || r.metadata.doc.vault_document)
            .filter(|(_, r)| matches_entity_filter(&r.metadata.doc, query.entity_variants))
            .map(|(pos, r)| {
                (
                    pos,
                    CandidateRow {
                        chunk: r.chunk.clone(),
                        facts: r.metadata.doc.clone(),
                        vector_score: cosine_similarity(query.embedding, &r.embedding),
                        lexical_score: lexical_rank(query.text, &r.chunk.text),
                    },
                )
            })
            .collect();

        if candidates.len() > query.limit {
            candidates.sort_by(|a, b| {
                b.1.vector_score
                    .partial_cmp(&a.1.vector_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            candidates.truncate(query.limit);
            candidates.sort_by_key(|(pos, _)| *pos);
        }

        Ok(candidates.into_iter().map(|(_, c)| c).collect())
    }

    async fn update_document_facts(
        &self,
        document_id: Uuid,
        facts: DocumentFacts,
    ) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().unwrap();
        let mut updated = 0;
        for row in rows.iter_mut() {
            if row.chunk.document_id == document_id {
                row.metadata.doc = facts.clone();
                updated += 1;
            }
        }
        if updated == 0 {
            return Err(StoreError::DocumentNotFound(document_id));
        }
        Ok(updated)
    }

    async fn set_ingestion_status(
        &self,
        document_id: Uuid,
        status: IngestionStatus,
    ) -> Result<(), StoreError> {
        self.statuses.write().unwrap().insert(document_id, status);
        Ok(())
    }

    async fn ingestion_status(
        &self,
        document_id: Uuid,
    ) -> Result<Option<IngestionStatus>, StoreError> {
        Ok(self.statuses.read().unwrap().get(&document_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ChunkFacts, ChunkMetadata, EmbeddingFacts};
    use chrono::Utc;

    fn record(document_id: Uuid, index: usize, text: &str, embedding: Vec<f32>) -> ChunkRecord {
        record_with_equipment(document_id, index, text, embedding, None)
    }

    fn record_with_equipment(
        document_id: Uuid,
        index: usize,
        text: &str,
        embedding: Vec<f32>,
        equipment: Option<&str>,
    ) -> ChunkRecord {
        ChunkRecord {
            chunk: StoredChunk {
                id: Uuid::new_v4(),
                document_id,
                text: text.to_string(),
                index,
                start_offset: index * 100,
                end_offset: index * 100 + text.len(),
            },
            metadata: ChunkMetadata {
                doc: DocumentFacts {
                    filename: "doc.pdf".to_string(),
                    equipment: equipment.map(str::to_string),
                    doc_type: "manual".to_string(),
                    source: "externo".to_string(),
                    ..Default::default()
                },
                chunk: ChunkFacts {
                    index,
                    start: index * 100,
                    end: index * 100 + text.len(),
                    page: 1,
                    method: "fixed".to_string(),
                    length: text.len(),
                    token_estimate: text.len() / 4,
                },
                embedding: EmbeddingFacts {
                    model: "test-model".to_string(),
                    vectorized_at: Utc::now(),
                },
            },
            embedding,
        }
    }

    fn query<'a>(
        embedding: &'a [f32],
        text: &'a str,
        variants: &'a [String],
    ) -> HybridQuery<'a> {
        HybridQuery {
            embedding,
            text,
            document_id: None,
            vault_only: false,
            entity_variants: variants,
            limit: 20,
        }
    }

    #[tokio::test]
    async fn test_append_and_delete() {
        let store = MemoryStore::new();
        let doc = Uuid::new_v4();
        store
            .append_chunks(vec![
                record(doc, 0, "primero", vec![1.0, 0.0]),
                record(doc, 1, "segundo", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.chunk_count(), 2);

        let removed = store.delete_document(doc).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn test_vector_scoring_orders_by_similarity() {
        let store = MemoryStore::new();
        let doc = Uuid::new_v4();
        store
            .append_chunks(vec![
                record(doc, 0, "texto alfa", vec![1.0, 0.0]),
                record(doc, 1, "texto beta", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let embedding = [1.0, 0.0];
        let rows = store
            .hybrid_query(query(&embedding, "consulta", &[]))
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        let alfa = rows.iter().find(|r| r.chunk.text == "texto alfa").unwrap();
        let beta = rows.iter().find(|r| r.chunk.text == "texto beta").unwrap();
        assert!(alfa.vector_score > beta.vector_score);
    }

    #[tokio::test]
    async fn test_lexical_rank_favors_matching_text() {
        let store = MemoryStore::new();
        let doc = Uuid::new_v4();
        store
            .append_chunks(vec![
                record(doc, 0, "mantenimiento de la bomba hidráulica", vec![1.0, 0.0]),
                record(doc, 1, "tabla de conversiones", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let embedding = [1.0, 0.0];
        let rows = store
            .hybrid_query(query(&embedding, "mantenimiento bomba", &[]))
            .await
            .unwrap();

        let hit = &rows[0];
        let miss = &rows[1];
        assert!(hit.lexical_score > miss.lexical_score);
        assert_eq!(miss.lexical_score, 0.0);
    }

    #[tokio::test]
    async fn test_entity_filter_restricts_candidates() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .append_chunks(vec![
                record_with_equipment(a, 0, "fallo del equipo", vec![1.0, 0.0], Some("WS600")),
                record_with_equipment(b, 0, "fallo del equipo", vec![1.0, 0.0], Some("RPU-3000")),
            ])
            .await
            .unwrap();

        let embedding = [1.0, 0.0];
        let variants = vec!["ws600".to_string(), "ws 600".to_string()];
        let rows = store
            .hybrid_query(query(&embedding, "fallo en WS600", &variants))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].facts.equipment.as_deref(), Some("WS600"));
    }

    #[tokio::test]
    async fn test_document_scope() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .append_chunks(vec![
                record(a, 0, "doc a", vec![1.0, 0.0]),
                record(b, 0, "doc b", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let embedding = [1.0, 0.0];
        let mut q = query(&embedding, "doc", &[]);
        q.document_id = Some(a);
        let rows = store.hybrid_query(q).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chunk.document_id, a);
    }

    #[tokio::test]
    async fn test_facts_rewrite_is_whole_document() {
        let store = MemoryStore::new();
        let doc = Uuid::new_v4();
        store
            .append_chunks(vec![
                record(doc, 0, "uno", vec![1.0]),
                record(doc, 1, "dos", vec![1.0]),
                record(doc, 2, "tres", vec![1.0]),
            ])
            .await
            .unwrap();

        let facts = DocumentFacts {
            filename: "doc.pdf".to_string(),
            equipment: Some("WS600".to_string()),
            doc_type: "manual".to_string(),
            source: "interno".to_string(),
            ..Default::default()
        };
        let updated = store.update_document_facts(doc, facts).await.unwrap();
        assert_eq!(updated, 3);

        let missing = store
            .update_document_facts(Uuid::new_v4(), DocumentFacts::default())
            .await;
        assert!(matches!(missing, Err(StoreError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn test_status_roundtrip() {
        let store = MemoryStore::new();
        let doc = Uuid::new_v4();
        assert!(store.ingestion_status(doc).await.unwrap().is_none());

        store
            .set_ingestion_status(doc, IngestionStatus::Processing)
            .await
            .unwrap();
        assert_eq!(
            store.ingestion_status(doc).await.unwrap(),
            Some(IngestionStatus::Processing)
        );
    }
}
