//! Configuration
//!
//! Two layers: static process configuration loaded from TOML (provider
//! endpoints, model names, database path), and runtime-mutable retrieval
//! parameters stored in the database behind [`ConfigStore`] with bounds
//! validation and a short-TTL cache.

use crate::error::{Result, TecvaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod store;

pub use store::{ConfigStore, KeyUpdateOutcome, RetrievalParams};

/// Value type of a runtime configuration entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigValueType {
    Int,
    Float,
    Text,
}

impl ConfigValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigValueType::Int => "int",
            ConfigValueType::Float => "float",
            ConfigValueType::Text => "text",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "int" => ConfigValueType::Int,
            "float" => ConfigValueType::Float,
            _ => ConfigValueType::Text,
        }
    }
}

/// One runtime configuration entry as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfigEntry {
    pub key: String,
    /// Raw value; parse through [`Self::as_i64`] / [`Self::as_f64`]
    pub value: String,
    pub value_type: ConfigValueType,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub description: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl RagConfigEntry {
    pub fn as_i64(&self) -> Option<i64> {
        self.value.trim().parse().ok()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.trim().parse().ok()
    }
}

/// Default definition of a runtime configuration key
#[derive(Debug, Clone)]
pub struct ConfigDefault {
    pub key: &'static str,
    pub value: &'static str,
    pub value_type: ConfigValueType,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub description: &'static str,
}

/// The complete set of runtime-tunable keys with their defaults and bounds.
/// Unknown keys are rejected on update; this list is the schema.
pub fn default_entries() -> &'static [ConfigDefault] {
    &[
        ConfigDefault {
            key: "chunk_size",
            value: "1000",
            value_type: ConfigValueType::Int,
            min_value: Some(100.0),
            max_value: Some(5000.0),
            description: "Maximum characters per chunk",
        },
        ConfigDefault {
            key: "chunk_overlap",
            value: "200",
            value_type: ConfigValueType::Int,
            min_value: Some(0.0),
            max_value: Some(1000.0),
            description: "Characters shared between consecutive chunks",
        },
        ConfigDefault {
            key: "top_k",
            value: "5",
            value_type: ConfigValueType::Int,
            min_value: Some(1.0),
            max_value: Some(50.0),
            description: "Maximum candidates returned by a retrieval call",
        },
        ConfigDefault {
            key: "min_similarity",
            value: "0.3",
            value_type: ConfigValueType::Float,
            min_value: Some(0.0),
            max_value: Some(1.0),
            description: "Vector similarity acceptance threshold",
        },
        ConfigDefault {
            key: "min_hybrid_score",
            value: "0.25",
            value_type: ConfigValueType::Float,
            min_value: Some(0.0),
            max_value: Some(1.0),
            description: "Hybrid score acceptance threshold",
        },
        ConfigDefault {
            key: "vector_weight",
            value: "0.6",
            value_type: ConfigValueType::Float,
            min_value: Some(0.0),
            max_value: Some(1.0),
            description: "Weight of the vector similarity in the hybrid score",
        },
        ConfigDefault {
            key: "lexical_weight",
            value: "0.4",
            value_type: ConfigValueType::Float,
            min_value: Some(0.0),
            max_value: Some(1.0),
            description: "Weight of the lexical rank in the hybrid score",
        },
        ConfigDefault {
            key: "chunking_method",
            value: "fixed",
            value_type: ConfigValueType::Text,
            min_value: None,
            max_value: None,
            description: "Chunking strategy: fixed or paragraph",
        },
    ]
}

/// Static process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub embedding: EmbeddingProviderConfig,
    pub generation: GenerationProviderConfig,
    /// Known equipment/manufacturer names for the entity detector
    #[serde(default)]
    pub known_entities: Vec<String>,
}

/// Remote embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    pub api_url: String,
    pub api_key_env: String,
    pub model: String,
    pub dimension: usize,
}

/// Remote generation provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationProviderConfig {
    pub api_url: String,
    pub api_key_env: String,
    pub standard_model: String,
    pub mini_model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("tecvault.db"),
            embedding: EmbeddingProviderConfig {
                api_url: "https://api.openai.com/v1/embeddings".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                model: "text-embedding-3-small".to_string(),
                dimension: 1536,
            },
            generation: GenerationProviderConfig {
                api_url: "https://api.openai.com/v1/chat/completions".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                standard_model: "gpt-5".to_string(),
                mini_model: "gpt-5-mini".to_string(),
            },
            known_entities: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TecvaultError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}
