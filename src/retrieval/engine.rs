//! Hybrid retrieval engine

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConfigStore;
use crate::embedding::EmbeddingProvider;
use crate::entities::EntityMatcher;
use crate::metadata::DocumentFacts;
use crate::storage::{HybridQuery, StoredChunk, VectorStore};

use super::scoring::{hybrid_score, passes_acceptance};
use super::RetrievalError;

/// Extra candidates fetched beyond top-k so fusion has room to reorder
const CANDIDATE_MULTIPLIER: usize = 4;

/// Options for one search call
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Restrict candidates to one document
    pub document_id: Option<Uuid>,
    /// Restrict candidates to vault documents
    pub vault_only: bool,
    /// Override the configured top-k
    pub top_k: Option<usize>,
    /// Run entity detection and constrain candidates by the variants found
    pub entity_filter: bool,
}

impl SearchOptions {
    pub fn scoped_to(document_id: Uuid) -> Self {
        Self {
            document_id: Some(document_id),
            ..Default::default()
        }
    }
}

/// One scored candidate, accepted or not
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub chunk: StoredChunk,
    pub facts: DocumentFacts,
    pub vector_score: f32,
    pub lexical_score: f32,
    pub hybrid_score: f32,
    pub accepted: bool,
    /// 1-based position after fusion ordering
    pub rank: usize,
}

/// Why this call selected what it selected
#[derive(Debug, Clone)]
pub struct SelectionMetadata {
    pub total_candidates: usize,
    pub selected_count: usize,
    pub rejected_count: usize,
    pub min_similarity_threshold: f32,
    pub min_hybrid_threshold: f32,
    pub detected_entities: Vec<String>,
}

/// Result of one search call: every scored candidate plus the thresholds
/// and entity variants used, so callers can audit the decision
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub candidates: Vec<ScoredCandidate>,
    pub metadata: SelectionMetadata,
}

impl SearchOutcome {
    /// Candidates that passed the acceptance filter, in rank order
    pub fn accepted(&self) -> impl Iterator<Item = &ScoredCandidate> {
        self.candidates.iter().filter(|c| c.accepted)
    }

    /// Assemble the accepted chunks into one context string
    pub fn context_text(&self) -> String {
        self.accepted()
            .enumerate()
            .map(|(i, c)| format!("[Fragmento {}]:\n{}", i + 1, c.chunk.text))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

/// Retrieval engine fusing vector similarity and lexical rank over the
/// store, with optional entity filtering
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: Arc<ConfigStore>,
    matcher: Arc<dyn EntityMatcher>,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: Arc<ConfigStore>,
        matcher: Arc<dyn EntityMatcher>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            matcher,
        }
    }

    /// Perform a hybrid search. A store failure fails the whole call; there
    /// is no partial-result fallback.
    pub async fn search(
        &self,
        query_text: &str,
        options: &SearchOptions,
    ) -> Result<SearchOutcome, RetrievalError> {
        if query_text.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }

        // Step 1: current parameters
        let params = self
            .config
            .retrieval_params()
            .await
            .map_err(|e| RetrievalError::Config(e.to_string()))?;
        let top_k = options.top_k.unwrap_or(params.top_k);

        // Step 2: entity detection, skipped when an explicit document scope
        // already narrows the search
        let detected_entities = if options.entity_filter && options.document_id.is_none() {
            self.matcher.detect(query_text)
        } else {
            Vec::new()
        };

        if !detected_entities.is_empty() {
            debug!(variants = ?detected_entities, "entity filter active");
        }

        // Step 3: one store query scoring both signals
        let query_embedding = self.embedder.embed(query_text).await?;
        let rows = self
            .store
            .hybrid_query(HybridQuery {
                embedding: &query_embedding,
                text: query_text,
                document_id: options.document_id,
                vault_only: options.vault_only,
                entity_variants: &detected_entities,
                limit: top_k * CANDIDATE_MULTIPLIER,
            })
            .await?;

        // Steps 4-5: fuse and rank. The sort is stable, so candidates with
        // equal hybrid scores keep the store's natural row order.
        let mut candidates: Vec<ScoredCandidate> = rows
            .into_iter()
            .map(|row| {
                let hybrid = hybrid_score(
                    row.vector_score,
                    row.lexical_score,
                    params.vector_weight,
                    params.lexical_weight,
                );
                ScoredCandidate {
                    chunk: row.chunk,
                    facts: row.facts,
                    vector_score: row.vector_score,
                    lexical_score: row.lexical_score,
                    hybrid_score: hybrid,
                    accepted: false,
                    rank: 0,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.hybrid_score
                .partial_cmp(&a.hybrid_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_k);

        // Step 6: acceptance — either signal alone can carry a candidate
        for (i, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = i + 1;
            candidate.accepted = passes_acceptance(
                candidate.vector_score,
                candidate.hybrid_score,
                params.min_similarity,
                params.min_hybrid_score,
            );
        }

        let selected_count = candidates.iter().filter(|c| c.accepted).count();
        let metadata = SelectionMetadata {
            total_candidates: candidates.len(),
            selected_count,
            rejected_count: candidates.len() - selected_count,
            min_similarity_threshold: params.min_similarity,
            min_hybrid_threshold: params.min_hybrid_score,
            detected_entities,
        };

        info!(
            total = metadata.total_candidates,
            selected = metadata.selected_count,
            top_score = candidates.first().map(|c| c.hybrid_score).unwrap_or(0.0),
            "search completed"
        );

        Ok(SearchOutcome {
            candidates,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingProvider};
    use crate::entities::HeuristicEntityMatcher;
    use crate::metadata::{ChunkFacts, ChunkMetadata, EmbeddingFacts};
    use crate::storage::{ChunkRecord, Database, MemoryStore};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Embeds text onto a 2d unit vector keyed by a marker word, so tests
    /// can steer similarity
    struct AxisProvider;

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("alfa") {
                Ok(vec![1.0, 0.0])
            } else if text.contains("beta") {
                Ok(vec![0.0, 1.0])
            } else {
                Ok(vec![0.7, 0.7])
            }
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "axis-test"
        }
    }

    fn record(
        document_id: Uuid,
        index: usize,
        text: &str,
        embedding: Vec<f32>,
        equipment: Option<&str>,
        vault: bool,
    ) -> ChunkRecord {
        ChunkRecord {
            chunk: StoredChunk {
                id: Uuid::new_v4(),
                document_id,
                text: text.to_string(),
                index,
                start_offset: 0,
                end_offset: text.len(),
            },
            metadata: ChunkMetadata {
                doc: DocumentFacts {
                    filename: format!("doc-{index}.pdf"),
                    equipment: equipment.map(str::to_string),
                    doc_type: "manual".to_string(),
                    source: "externo".to_string(),
                    vault_document: vault,
                    ..Default::default()
                },
                chunk: ChunkFacts {
                    index,
                    start: 0,
                    end: text.len(),
                    page: 1,
                    method: "fixed".to_string(),
                    length: text.len(),
                    token_estimate: text.len() / 4,
                },
                embedding: EmbeddingFacts {
                    model: "axis-test".to_string(),
                    vectorized_at: Utc::now(),
                },
            },
            embedding,
        }
    }

    async fn retriever_with(records: Vec<ChunkRecord>) -> HybridRetriever {
        let store = Arc::new(MemoryStore::new());
        store.append_chunks(records).await.unwrap();
        let database = Arc::new(Database::in_memory().unwrap());
        let config = Arc::new(ConfigStore::new(database).unwrap());
        HybridRetriever::new(
            store,
            Arc::new(AxisProvider),
            config,
            Arc::new(HeuristicEntityMatcher::new(Vec::new())),
        )
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let retriever = retriever_with(Vec::new()).await;
        let result = retriever.search("  ", &SearchOptions::default()).await;
        assert!(matches!(result, Err(RetrievalError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_ranking_by_hybrid_score() {
        let doc = Uuid::new_v4();
        let retriever = retriever_with(vec![
            record(doc, 0, "texto sobre beta", vec![0.0, 1.0], None, false),
            record(doc, 1, "texto sobre alfa", vec![1.0, 0.0], None, false),
        ])
        .await;

        let outcome = retriever
            .search("consulta alfa", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.candidates[0].chunk.text, "texto sobre alfa");
        assert_eq!(outcome.candidates[0].rank, 1);
        assert!(outcome.candidates[0].hybrid_score > outcome.candidates[1].hybrid_score);
    }

    #[tokio::test]
    async fn test_acceptance_or_semantics() {
        let doc = Uuid::new_v4();
        // High vector similarity, no lexical overlap: accepted on vector alone
        // Orthogonal vector, no lexical overlap: rejected on both
        let retriever = retriever_with(vec![
            record(doc, 0, "registro de calibracion", vec![1.0, 0.0], None, false),
            record(doc, 1, "registro de calibracion", vec![0.0, 1.0], None, false),
        ])
        .await;

        let outcome = retriever
            .search("consulta alfa", &SearchOptions::default())
            .await
            .unwrap();

        let accepted: Vec<_> = outcome.accepted().collect();
        assert_eq!(accepted.len(), 1);
        assert!(accepted[0].vector_score > 0.9);
        assert_eq!(outcome.metadata.rejected_count, 1);
    }

    #[tokio::test]
    async fn test_entity_filter_scenario() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let retriever = retriever_with(vec![
            record(a, 0, "manual de fallos", vec![0.7, 0.7], Some("WS600"), false),
            record(b, 0, "manual de fallos", vec![0.7, 0.7], Some("RPU-3000"), false),
        ])
        .await;

        let options = SearchOptions {
            entity_filter: true,
            ..Default::default()
        };
        let outcome = retriever.search("fallo en WS600", &options).await.unwrap();

        assert!(!outcome.metadata.detected_entities.is_empty());
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(
            outcome.candidates[0].facts.equipment.as_deref(),
            Some("WS600")
        );
    }

    #[tokio::test]
    async fn test_document_scope_skips_entity_detection() {
        let doc = Uuid::new_v4();
        let retriever = retriever_with(vec![record(
            doc,
            0,
            "manual de fallos",
            vec![0.7, 0.7],
            Some("RPU-3000"),
            false,
        )])
        .await;

        let mut options = SearchOptions::scoped_to(doc);
        options.entity_filter = true;
        let outcome = retriever.search("fallo en WS600", &options).await.unwrap();

        // Scoped search ignores the detected entity and still finds the doc
        assert!(outcome.metadata.detected_entities.is_empty());
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_vault_only_scope() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let retriever = retriever_with(vec![
            record(a, 0, "texto alfa publico", vec![1.0, 0.0], None, false),
            record(b, 0, "texto alfa curado", vec![1.0, 0.0], None, true),
        ])
        .await;

        let options = SearchOptions {
            vault_only: true,
            ..Default::default()
        };
        let outcome = retriever.search("consulta alfa", &options).await.unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert!(outcome.candidates[0].facts.vault_document);
    }

    #[tokio::test]
    async fn test_top_k_truncation() {
        let doc = Uuid::new_v4();
        let records = (0..10)
            .map(|i| record(doc, i, "texto alfa repetido", vec![1.0, 0.0], None, false))
            .collect();
        let retriever = retriever_with(records).await;

        let options = SearchOptions {
            top_k: Some(3),
            ..Default::default()
        };
        let outcome = retriever.search("consulta alfa", &options).await.unwrap();

        assert_eq!(outcome.candidates.len(), 3);
        assert_eq!(outcome.metadata.total_candidates, 3);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_row_order() {
        let doc = Uuid::new_v4();
        let records = (0..4)
            .map(|i| record(doc, i, "identico", vec![1.0, 0.0], None, false))
            .collect();
        let retriever = retriever_with(records).await;

        let outcome = retriever
            .search("consulta alfa", &SearchOptions::default())
            .await
            .unwrap();

        let indexes: Vec<usize> = outcome.candidates.iter().map(|c| c.chunk.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_context_text_numbers_fragments() {
        let doc = Uuid::new_v4();
        let retriever = retriever_with(vec![
            record(doc, 0, "texto alfa uno", vec![1.0, 0.0], None, false),
            record(doc, 1, "texto alfa dos", vec![1.0, 0.0], None, false),
        ])
        .await;

        let outcome = retriever
            .search("consulta alfa", &SearchOptions::default())
            .await
            .unwrap();
        let context = outcome.context_text();

        assert!(context.starts_with("[Fragmento 1]:\n"));
        assert!(context.contains("[Fragmento 2]:\n"));
        assert!(context.contains("\n\n---\n\n"));
    }
}
