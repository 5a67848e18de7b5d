//! SQLite sidecar with migrations
//!
//! Holds the runtime retrieval configuration, its change history, the
//! append-only chunk selection audit trail, and persisted analysis runs.
//! Chunk text and vectors live in the vector store, not here.

use crate::config::{ConfigDefault, ConfigValueType, RagConfigEntry};
use crate::error::{Result, TecvaultError};
use crate::retrieval::ChunkSelectionRecord;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) the database at the given path
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TecvaultError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        Self::from_manager(manager, 8)
    }

    /// Open an in-memory database, used by tests and one-shot runs.
    /// Pool is pinned to one connection: each connection to `:memory:`
    /// would otherwise see its own database.
    pub fn in_memory() -> Result<Self> {
        Self::from_manager(SqliteConnectionManager::memory(), 1)
    }

    fn from_manager(manager: SqliteConnectionManager, max_size: u32) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| TecvaultError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| TecvaultError::Config(format!("Failed to get connection: {}", e)))?;

            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let db = Self { pool };
        db.migrate()?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| TecvaultError::Config(format!("Failed to get connection: {}", e)))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    // --- runtime configuration ---

    /// Insert any missing configuration keys with their default values.
    /// Existing rows are left untouched.
    pub fn seed_config_defaults(&self, defaults: &[ConfigDefault]) -> Result<()> {
        let conn = self.get_conn()?;
        for d in defaults {
            conn.execute(
                "INSERT OR IGNORE INTO rag_config
                 (config_key, config_value, value_type, min_value, max_value, description, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    d.key,
                    d.value,
                    d.value_type.as_str(),
                    d.min_value,
                    d.max_value,
                    d.description,
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }
        Ok(())
    }

    pub fn config_entries(&self) -> Result<Vec<RagConfigEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT config_key, config_value, value_type, min_value, max_value,
                    description, updated_at, updated_by
             FROM rag_config ORDER BY config_key",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn config_entry(&self, key: &str) -> Result<Option<RagConfigEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT config_key, config_value, value_type, min_value, max_value,
                    description, updated_at, updated_by
             FROM rag_config WHERE config_key = ?1",
        )?;
        let mut rows = stmt.query_map(params![key], row_to_entry)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Update one configuration value and append a history row
    pub fn set_config_value(
        &self,
        key: &str,
        old_value: &str,
        new_value: &str,
        actor: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "UPDATE rag_config SET config_value = ?1, updated_at = ?2, updated_by = ?3
             WHERE config_key = ?4",
            params![new_value, now, actor, key],
        )?;
        tx.execute(
            "INSERT INTO rag_config_history (config_key, old_value, new_value, changed_by, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, old_value, new_value, actor, now],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn config_history(&self, limit: usize) -> Result<Vec<ConfigChangeRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT config_key, old_value, new_value, changed_by, changed_at
             FROM rag_config_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ConfigChangeRecord {
                key: row.get(0)?,
                old_value: row.get(1)?,
                new_value: row.get(2)?,
                changed_by: row.get(3)?,
                changed_at: row.get::<_, String>(4)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    // --- selection audit trail ---

    /// Append selection records. Rows are never updated or deleted.
    pub fn insert_selection_records(&self, records: &[ChunkSelectionRecord]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunk_selection_history (
                    chunk_id, document_id, chunk_index, chunk_excerpt, query_excerpt,
                    vector_score, lexical_score, hybrid_score,
                    min_similarity_threshold, min_hybrid_threshold,
                    operation_type, operation_subtype,
                    was_selected, rejection_reason, rank_position, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.chunk_id.to_string(),
                    r.document_id.to_string(),
                    r.chunk_index as i64,
                    r.chunk_excerpt,
                    r.query_excerpt,
                    r.vector_score as f64,
                    r.lexical_score as f64,
                    r.hybrid_score as f64,
                    r.min_similarity_threshold as f64,
                    r.min_hybrid_threshold as f64,
                    r.operation_type,
                    r.operation_subtype,
                    r.was_selected,
                    r.rejection_reason,
                    r.rank_position as i64,
                    r.recorded_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn selection_record_count(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunk_selection_history", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    // --- analysis runs ---

    /// Persist a completed analysis run as a single row
    pub fn insert_analysis_run(&self, run: &crate::analysis::AnalysisRun) -> Result<()> {
        let payload = serde_json::to_string(run).map_err(|e| TecvaultError::Json {
            source: e,
            context: "Failed to serialize analysis run".to_string(),
        })?;

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO analysis_runs (
                id, analysis_type, model_tier, payload,
                duration_ms, tokens_total, succeeded, failed, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id.to_string(),
                run.analysis_type,
                run.model_tier.as_str(),
                payload,
                run.stats.total_duration_ms as i64,
                run.stats.tokens_total as i64,
                run.stats.succeeded as i64,
                run.stats.failed as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Basic row counts for status reporting
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let config_keys: i64 =
            conn.query_row("SELECT COUNT(*) FROM rag_config", [], |row| row.get(0))?;
        let selection_records: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunk_selection_history", [], |row| {
                row.get(0)
            })?;
        let analysis_runs: i64 =
            conn.query_row("SELECT COUNT(*) FROM analysis_runs", [], |row| row.get(0))?;

        Ok(DbStats {
            config_keys: config_keys as usize,
            selection_records: selection_records as usize,
            analysis_runs: analysis_runs as usize,
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RagConfigEntry> {
    let value_type: String = row.get(2)?;
    let updated_at: String = row.get(6)?;
    Ok(RagConfigEntry {
        key: row.get(0)?,
        value: row.get(1)?,
        value_type: ConfigValueType::from_str(&value_type),
        min_value: row.get(3)?,
        max_value: row.get(4)?,
        description: row.get(5)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_by: row.get(7)?,
    })
}

/// One configuration change, newest first
#[derive(Debug, Clone)]
pub struct ConfigChangeRecord {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub changed_by: Option<String>,
    pub changed_at: String,
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub config_keys: usize,
    pub selection_records: usize,
    pub analysis_runs: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: runtime config + audit tables
    r#"
    -- Runtime retrieval configuration
    CREATE TABLE rag_config (
        config_key TEXT PRIMARY KEY,
        config_value TEXT NOT NULL,
        value_type TEXT NOT NULL,
        min_value REAL,
        max_value REAL,
        description TEXT NOT NULL DEFAULT '',
        updated_at TEXT NOT NULL,
        updated_by TEXT
    );

    -- Configuration change history
    CREATE TABLE rag_config_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        config_key TEXT NOT NULL,
        old_value TEXT,
        new_value TEXT NOT NULL,
        changed_by TEXT,
        changed_at TEXT NOT NULL
    );

    CREATE INDEX idx_config_history_key ON rag_config_history(config_key);

    -- Append-only chunk selection audit trail
    CREATE TABLE chunk_selection_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chunk_id TEXT NOT NULL,
        document_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        chunk_excerpt TEXT NOT NULL,
        query_excerpt TEXT NOT NULL,
        vector_score REAL NOT NULL,
        lexical_score REAL NOT NULL,
        hybrid_score REAL NOT NULL,
        min_similarity_threshold REAL NOT NULL,
        min_hybrid_threshold REAL NOT NULL,
        operation_type TEXT NOT NULL,
        operation_subtype TEXT,
        was_selected INTEGER NOT NULL,
        rejection_reason TEXT,
        rank_position INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX idx_selection_history_document ON chunk_selection_history(document_id);
    CREATE INDEX idx_selection_history_operation ON chunk_selection_history(operation_type);

    -- Persisted analysis runs
    CREATE TABLE analysis_runs (
        id TEXT PRIMARY KEY,
        analysis_type TEXT NOT NULL,
        model_tier TEXT NOT NULL,
        payload TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        tokens_total INTEGER NOT NULL,
        succeeded INTEGER NOT NULL,
        failed INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_entries;

    #[test]
    fn test_migrations_apply() {
        let db = Database::in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.config_keys, 0);
        assert_eq!(stats.selection_records, 0);
        assert_eq!(stats.analysis_runs, 0);
    }

    #[test]
    fn test_seed_defaults_idempotent() {
        let db = Database::in_memory().unwrap();
        db.seed_config_defaults(default_entries()).unwrap();
        let first = db.stats().unwrap().config_keys;
        assert!(first > 0);

        // Seeding again must not duplicate or overwrite
        db.set_config_value("top_k", "5", "10", Some("admin"))
            .unwrap();
        db.seed_config_defaults(default_entries()).unwrap();
        assert_eq!(db.stats().unwrap().config_keys, first);
        assert_eq!(db.config_entry("top_k").unwrap().unwrap().value, "10");
    }

    #[test]
    fn test_config_update_writes_history() {
        let db = Database::in_memory().unwrap();
        db.seed_config_defaults(default_entries()).unwrap();

        db.set_config_value("top_k", "5", "8", Some("admin"))
            .unwrap();
        let history = db.config_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].key, "top_k");
        assert_eq!(history[0].old_value.as_deref(), Some("5"));
        assert_eq!(history[0].new_value, "8");
        assert_eq!(history[0].changed_by.as_deref(), Some("admin"));
    }

    #[test]
    fn test_unknown_config_entry_is_none() {
        let db = Database::in_memory().unwrap();
        db.seed_config_defaults(default_entries()).unwrap();
        assert!(db.config_entry("nonexistent").unwrap().is_none());
    }
}
