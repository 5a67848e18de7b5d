//! Typed chunk metadata
//!
//! Every embedded chunk carries three layers of facts: document-level,
//! chunk-level, and embedding-level. Document facts are mutable only as a
//! whole-document batch rewrite; the other two layers are written once at
//! ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::generation::{parse_model_response, GenerationProvider, ModelTier};

/// Average characters per printed page, used for the page estimate
const CHARS_PER_PAGE: usize = 2000;

/// Document types recognized by the vault
pub const DOC_TYPES: &[&str] = &[
    "manual",
    "datasheet",
    "pliego",
    "interno",
    "oferta",
    "informe",
    "otro",
];

/// Document-level facts, shared by every chunk of a document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFacts {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Equipment/product name the document is about, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equipment: Option<String>,
    /// Manufacturer/brand name, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// One of [`DOC_TYPES`]
    pub doc_type: String,
    /// Provenance: "interno" or "externo"
    pub source: String,
    /// Whether the document belongs to the admin-curated vault
    #[serde(default)]
    pub vault_document: bool,
}

/// Chunk-level facts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFacts {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    /// Estimated page, ~2000 characters per page
    pub page: usize,
    /// Chunking strategy name ("fixed", "paragraph")
    pub method: String,
    pub length: usize,
    pub token_estimate: usize,
}

/// Embedding-level facts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingFacts {
    pub model: String,
    pub vectorized_at: DateTime<Utc>,
}

/// Complete metadata record attached to each embedded chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc: DocumentFacts,
    pub chunk: ChunkFacts,
    pub embedding: EmbeddingFacts,
}

/// Estimate the page a chunk starts on from its start offset
pub fn estimate_page(start_offset: usize) -> usize {
    start_offset / CHARS_PER_PAGE + 1
}

/// Normalize a model-supplied doc_type to the recognized whitelist
pub fn normalize_doc_type(value: Option<&str>) -> String {
    match value {
        Some(v) => {
            let v = v.trim().to_lowercase();
            if DOC_TYPES.contains(&v.as_str()) {
                v
            } else {
                "otro".to_string()
            }
        }
        None => "otro".to_string(),
    }
}

/// Normalize a model-supplied source to "interno" or "externo"
pub fn normalize_source(value: Option<&str>) -> String {
    match value {
        Some(v) => {
            let v = v.trim().to_lowercase();
            if v == "interno" || v == "externo" {
                v
            } else {
                "externo".to_string()
            }
        }
        None => "externo".to_string(),
    }
}

/// Extract document facts from the opening of a document using the
/// generation provider.
///
/// Only the first 3000 characters are sent. Provider failure degrades to
/// default facts so an upload never fails on metadata extraction.
pub async fn extract_document_facts(
    provider: &dyn GenerationProvider,
    text: &str,
    filename: &str,
) -> DocumentFacts {
    let sample: String = text.chars().take(3000).collect();

    let prompt = format!(
        "Analiza este texto del inicio de un documento técnico y devuelve SOLO un JSON con:\n\n\
         - equipo: nombre del equipo/producto mencionado (string o null)\n\
         - fabricante: nombre del fabricante/marca mencionado (string o null)\n\
         - doc_type: tipo de documento, uno de estos valores: \"manual\", \"datasheet\", \"oferta\", \"interno\", \"pliego\", \"informe\", \"otro\"\n\
         - source: origen del documento: \"interno\" o \"externo\"\n\n\
         Documento: \"{filename}\"\n---\n{sample}\n---\n\n\
         Devuelve ÚNICAMENTE un JSON válido, sin explicaciones adicionales."
    );

    let fallback = DocumentFacts {
        filename: filename.to_string(),
        doc_type: "otro".to_string(),
        source: "externo".to_string(),
        ..Default::default()
    };

    let completion = match provider.complete(&prompt, ModelTier::Mini).await {
        Ok(c) => c,
        Err(e) => {
            warn!(filename, error = %e, "metadata extraction failed, using defaults");
            return fallback;
        }
    };

    let parsed = parse_model_response(&completion.text);
    debug!(filename, tokens = completion.tokens_total(), "metadata extracted");

    DocumentFacts {
        filename: filename.to_string(),
        equipment: parsed
            .get("equipo")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        manufacturer: parsed
            .get("fabricante")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        doc_type: normalize_doc_type(parsed.get("doc_type").and_then(|v| v.as_str())),
        source: normalize_source(parsed.get("source").and_then(|v| v.as_str())),
        ..fallback
    }
}

/// Build the full metadata record for one chunk at ingestion time
pub fn build_chunk_metadata(
    facts: &DocumentFacts,
    chunk: &crate::chunking::TextChunk,
    method: &str,
    token_estimate: usize,
    model: &str,
) -> ChunkMetadata {
    ChunkMetadata {
        doc: facts.clone(),
        chunk: ChunkFacts {
            index: chunk.index,
            start: chunk.start_offset,
            end: chunk.end_offset,
            page: estimate_page(chunk.start_offset),
            method: method.to_string(),
            length: chunk.text.len(),
            token_estimate,
        },
        embedding: EmbeddingFacts {
            model: model.to_string(),
            vectorized_at: Utc::now(),
        },
    }
}

/// Persisted ingestion status of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum IngestionStatus {
    Pending,
    Processing,
    Completed,
    Failed(String),
}

impl IngestionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::Processing => "processing",
            IngestionStatus::Completed => "completed",
            IngestionStatus::Failed(_) => "failed",
        }
    }
}

/// Identifies a document to the analysis orchestrator
#[derive(Debug, Clone)]
pub struct DocumentContext {
    pub document_id: Uuid,
    pub filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{Completion, GenerationError};
    use async_trait::async_trait;

    struct FixedAnswer(&'static str);

    #[async_trait]
    impl GenerationProvider for FixedAnswer {
        async fn complete(
            &self,
            _prompt: &str,
            _tier: ModelTier,
        ) -> Result<Completion, GenerationError> {
            if self.0.is_empty() {
                return Err(GenerationError::EmptyResponse);
            }
            Ok(Completion {
                text: self.0.to_string(),
                tokens_in: 50,
                tokens_out: 20,
                model: "stub".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_extract_facts_from_model_answer() {
        let provider = FixedAnswer(
            r#"{"equipo": "WS600", "fabricante": "Vortex", "doc_type": "Manual", "source": "interno"}"#,
        );
        let facts = extract_document_facts(&provider, "Manual del caudalimetro WS600", "ws600.pdf").await;

        assert_eq!(facts.filename, "ws600.pdf");
        assert_eq!(facts.equipment.as_deref(), Some("WS600"));
        assert_eq!(facts.manufacturer.as_deref(), Some("Vortex"));
        assert_eq!(facts.doc_type, "manual");
        assert_eq!(facts.source, "interno");
    }

    #[tokio::test]
    async fn test_extract_facts_normalizes_bad_values() {
        let provider = FixedAnswer(r#"{"doc_type": "invoice", "source": "vendor"}"#);
        let facts = extract_document_facts(&provider, "texto", "doc.pdf").await;

        assert_eq!(facts.doc_type, "otro");
        assert_eq!(facts.source, "externo");
        assert!(facts.equipment.is_none());
    }

    #[tokio::test]
    async fn test_extract_facts_degrades_on_provider_error() {
        let provider = FixedAnswer("");
        let facts = extract_document_facts(&provider, "texto", "doc.pdf").await;

        assert_eq!(facts.filename, "doc.pdf");
        assert_eq!(facts.doc_type, "otro");
        assert_eq!(facts.source, "externo");
    }

    #[test]
    fn test_estimate_page() {
        assert_eq!(estimate_page(0), 1);
        assert_eq!(estimate_page(1999), 1);
        assert_eq!(estimate_page(2000), 2);
        assert_eq!(estimate_page(8500), 5);
    }

    #[test]
    fn test_normalize_doc_type() {
        assert_eq!(normalize_doc_type(Some("Manual")), "manual");
        assert_eq!(normalize_doc_type(Some("  DATASHEET ")), "datasheet");
        assert_eq!(normalize_doc_type(Some("invoice")), "otro");
        assert_eq!(normalize_doc_type(None), "otro");
    }

    #[test]
    fn test_normalize_source() {
        assert_eq!(normalize_source(Some("Interno")), "interno");
        assert_eq!(normalize_source(Some("partner")), "externo");
        assert_eq!(normalize_source(None), "externo");
    }

    #[test]
    fn test_ingestion_status_str() {
        assert_eq!(IngestionStatus::Pending.as_str(), "pending");
        assert_eq!(
            IngestionStatus::Failed("boom".to_string()).as_str(),
            "failed"
        );
    }
}
