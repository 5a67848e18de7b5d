//! Runtime configuration store with a TTL-bounded cache
//!
//! Reads go through a whole-map cache that expires after a short TTL and is
//! cleared eagerly on any successful write. Updates validate each key
//! independently: an invalid or unknown key never blocks the other keys in
//! the same batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::Database;

use super::{default_entries, ConfigValueType, RagConfigEntry};

/// How long a cached configuration snapshot stays valid
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Outcome of updating a single configuration key
#[derive(Debug, Clone)]
pub struct KeyUpdateOutcome {
    pub key: String,
    pub success: bool,
    pub new_value: Option<String>,
    pub error: Option<String>,
}

impl KeyUpdateOutcome {
    fn ok(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            success: true,
            new_value: Some(value.to_string()),
            error: None,
        }
    }

    fn fail(key: &str, error: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            success: false,
            new_value: None,
            error: Some(error.into()),
        }
    }
}

/// Typed snapshot of the parameters the retrieval path reads
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub min_similarity: f32,
    pub min_hybrid_score: f32,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    pub chunking_method: String,
}

struct CachedSnapshot {
    entries: HashMap<String, RagConfigEntry>,
    refreshed_at: Instant,
}

/// Cached, validated runtime configuration over the database
pub struct ConfigStore {
    database: Arc<Database>,
    cache: RwLock<Option<CachedSnapshot>>,
    ttl: Duration,
}

impl ConfigStore {
    /// Create the store, seeding any missing keys with defaults
    pub fn new(database: Arc<Database>) -> Result<Self> {
        database.seed_config_defaults(default_entries())?;
        Ok(Self {
            database,
            cache: RwLock::new(None),
            ttl: CACHE_TTL,
        })
    }

    /// Override the cache TTL (tests use a zero TTL)
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Clear the cached snapshot; the next read refetches
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Current configuration map, served from cache when fresh
    pub async fn snapshot(&self) -> Result<HashMap<String, RagConfigEntry>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.refreshed_at.elapsed() < self.ttl {
                    return Ok(cached.entries.clone());
                }
            }
        }

        let entries: HashMap<String, RagConfigEntry> = self
            .database
            .config_entries()?
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();

        debug!(keys = entries.len(), "configuration cache refreshed");

        *self.cache.write().await = Some(CachedSnapshot {
            entries: entries.clone(),
            refreshed_at: Instant::now(),
        });

        Ok(entries)
    }

    pub async fn get_i64(&self, key: &str, default: i64) -> Result<i64> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.get(key).and_then(|e| e.as_i64()).unwrap_or(default))
    }

    pub async fn get_f64(&self, key: &str, default: f64) -> Result<f64> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.get(key).and_then(|e| e.as_f64()).unwrap_or(default))
    }

    pub async fn get_string(&self, key: &str, default: &str) -> Result<String> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .get(key)
            .map(|e| e.value.clone())
            .unwrap_or_else(|| default.to_string()))
    }

    /// Typed view of the retrieval parameters
    pub async fn retrieval_params(&self) -> Result<RetrievalParams> {
        let snapshot = self.snapshot().await?;
        let i64_of = |key: &str, default: i64| {
            snapshot.get(key).and_then(|e| e.as_i64()).unwrap_or(default)
        };
        let f32_of = |key: &str, default: f64| {
            snapshot.get(key).and_then(|e| e.as_f64()).unwrap_or(default) as f32
        };

        Ok(RetrievalParams {
            chunk_size: i64_of("chunk_size", 1000) as usize,
            chunk_overlap: i64_of("chunk_overlap", 200) as usize,
            top_k: i64_of("top_k", 5) as usize,
            min_similarity: f32_of("min_similarity", 0.3),
            min_hybrid_score: f32_of("min_hybrid_score", 0.25),
            vector_weight: f32_of("vector_weight", 0.6),
            lexical_weight: f32_of("lexical_weight", 0.4),
            chunking_method: snapshot
                .get("chunking_method")
                .map(|e| e.value.clone())
                .unwrap_or_else(|| "fixed".to_string()),
        })
    }

    /// Apply a batch of updates, validating each key independently.
    /// Valid keys are applied even when other keys in the batch fail.
    pub async fn update(
        &self,
        updates: &[(String, String)],
        actor: Option<&str>,
    ) -> Result<Vec<KeyUpdateOutcome>> {
        let mut outcomes = Vec::with_capacity(updates.len());
        let mut any_applied = false;

        for (key, value) in updates {
            let entry = match self.database.config_entry(key)? {
                Some(entry) => entry,
                None => {
                    outcomes.push(KeyUpdateOutcome::fail(key, "Config key not found"));
                    continue;
                }
            };

            if let Some(outcome) = validate_value(&entry, value) {
                outcomes.push(outcome);
                continue;
            }

            self.database
                .set_config_value(key, &entry.value, value, actor)?;
            info!(key, value, actor = actor.unwrap_or("-"), "config updated");
            outcomes.push(KeyUpdateOutcome::ok(key, value));
            any_applied = true;
        }

        if any_applied {
            self.invalidate().await;
        }

        Ok(outcomes)
    }

    /// Recent configuration changes, newest first
    pub fn history(&self, limit: usize) -> Result<Vec<crate::storage::ConfigChangeRecord>> {
        self.database.config_history(limit)
    }

    /// Reset every key to its default value
    pub async fn reset_to_defaults(&self, actor: Option<&str>) -> Result<Vec<KeyUpdateOutcome>> {
        let updates: Vec<(String, String)> = default_entries()
            .iter()
            .map(|d| (d.key.to_string(), d.value.to_string()))
            .collect();
        let outcomes = self.update(&updates, actor).await?;
        info!(actor = actor.unwrap_or("-"), "config reset to defaults");
        Ok(outcomes)
    }
}

/// Validate a raw value against an entry's type and bounds.
/// Returns the failure outcome, or None when the value is acceptable.
fn validate_value(entry: &RagConfigEntry, value: &str) -> Option<KeyUpdateOutcome> {
    let numeric = match entry.value_type {
        ConfigValueType::Int => match value.trim().parse::<i64>() {
            Ok(n) => Some(n as f64),
            Err(_) => {
                return Some(KeyUpdateOutcome::fail(
                    &entry.key,
                    format!("Value must be an integer, got '{value}'"),
                ))
            }
        },
        ConfigValueType::Float => match value.trim().parse::<f64>() {
            Ok(n) => Some(n),
            Err(_) => {
                return Some(KeyUpdateOutcome::fail(
                    &entry.key,
                    format!("Value must be a number, got '{value}'"),
                ))
            }
        },
        ConfigValueType::Text => None,
    };

    if let Some(n) = numeric {
        if let Some(min) = entry.min_value {
            if n < min {
                return Some(KeyUpdateOutcome::fail(
                    &entry.key,
                    format!("Value must be >= {min}"),
                ));
            }
        }
        if let Some(max) = entry.max_value {
            if n > max {
                return Some(KeyUpdateOutcome::fail(
                    &entry.key,
                    format!("Value must be <= {max}"),
                ));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigStore {
        let database = Arc::new(Database::in_memory().unwrap());
        ConfigStore::new(database).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_seeded() {
        let store = store();
        let params = store.retrieval_params().await.unwrap();
        assert_eq!(params.chunk_size, 1000);
        assert_eq!(params.chunk_overlap, 200);
        assert_eq!(params.top_k, 5);
        assert!((params.min_similarity - 0.3).abs() < f32::EPSILON);
        assert!((params.min_hybrid_score - 0.25).abs() < f32::EPSILON);
        assert_eq!(params.chunking_method, "fixed");
    }

    #[tokio::test]
    async fn test_partial_update_applies_valid_keys() {
        let store = store();
        let outcomes = store
            .update(
                &[
                    ("chunk_size".to_string(), "50000".to_string()),
                    ("top_k".to_string(), "5".to_string()),
                ],
                Some("admin"),
            )
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].key, "chunk_size");
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_deref().unwrap().contains("<= 5000"));
        assert_eq!(outcomes[1].key, "top_k");
        assert!(outcomes[1].success);
    }

    #[tokio::test]
    async fn test_unknown_key_rejected_without_aborting() {
        let store = store();
        let outcomes = store
            .update(
                &[
                    ("no_such_key".to_string(), "1".to_string()),
                    ("top_k".to_string(), "9".to_string()),
                ],
                None,
            )
            .await
            .unwrap();

        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].error.as_deref(), Some("Config key not found"));
        assert!(outcomes[1].success);
        assert_eq!(store.get_i64("top_k", 0).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_type_validation() {
        let store = store();
        let outcomes = store
            .update(&[("top_k".to_string(), "many".to_string())], None)
            .await
            .unwrap();
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_deref().unwrap().contains("integer"));
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_write() {
        let store = store();
        // Prime the cache
        assert_eq!(store.get_i64("top_k", 0).await.unwrap(), 5);

        store
            .update(&[("top_k".to_string(), "12".to_string())], Some("admin"))
            .await
            .unwrap();

        // A fresh read sees the new value despite the long TTL
        assert_eq!(store.get_i64("top_k", 0).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_reset_to_defaults() {
        let store = store();
        store
            .update(&[("top_k".to_string(), "42".to_string())], None)
            .await
            .unwrap();
        assert_eq!(store.get_i64("top_k", 0).await.unwrap(), 42);

        let outcomes = store.reset_to_defaults(Some("admin")).await.unwrap();
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(store.get_i64("top_k", 0).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_history_records_changes() {
        let store = store();
        store
            .update(&[("top_k".to_string(), "7".to_string())], Some("admin"))
            .await
            .unwrap();
        store
            .update(&[("top_k".to_string(), "9".to_string())], Some("admin"))
            .await
            .unwrap();

        let history = store.history(10).unwrap();
        assert_eq!(history.len(), 2);
        // Newest first
        assert_eq!(history[0].new_value, "9");
        assert_eq!(history[1].new_value, "7");
    }
}
