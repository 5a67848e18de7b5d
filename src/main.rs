use std::path::{Path, PathBuf};
use std::sync::Arc;

use tecvault::analysis::{load_tasks, ParallelAnalyzer};
use tecvault::cli::{Cli, Commands, ConfigAction};
use tecvault::config::{ConfigStore, EngineConfig};
use tecvault::embedding::{IngestionPipeline, RemoteEmbeddingProvider};
use tecvault::entities::HeuristicEntityMatcher;
use tecvault::error::{Result, TecvaultError};
use tecvault::generation::{ModelTier, RemoteGenerationProvider};
use tecvault::metadata::{extract_document_facts, DocumentContext, DocumentFacts};
use tecvault::retrieval::{HybridRetriever, SearchOptions, SelectionAuditor};
use tecvault::storage::{Database, MemoryStore};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse_args();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            file,
            equipment,
            manufacturer,
            doc_type,
            vault,
            auto_facts,
        } => cmd_ingest(&config, &file, equipment, manufacturer, doc_type, vault, auto_facts).await,
        Commands::Search {
            query,
            files,
            top_k,
            vault_only,
            no_entity_filter,
            json,
        } => cmd_search(&config, &query, &files, top_k, vault_only, no_entity_filter, json).await,
        Commands::Analyze {
            tasks,
            analysis_type,
            standard,
            files,
        } => cmd_analyze(&config, &tasks, &analysis_type, standard, &files).await,
        Commands::Config { action } => cmd_config(&config, action).await,
        Commands::Stats => cmd_stats(&config),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tecvault=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Everything a one-shot command needs, wired over the in-memory store and
/// the SQLite sidecar
struct Engine {
    pipeline: IngestionPipeline,
    retriever: Arc<HybridRetriever>,
    auditor: Arc<SelectionAuditor>,
    database: Arc<Database>,
}

fn build_engine(config: &EngineConfig) -> Result<Engine> {
    let database = Arc::new(Database::new(&config.database_path)?);
    let config_store = Arc::new(ConfigStore::new(database.clone())?);
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(RemoteEmbeddingProvider::new(config.embedding.clone())?);
    let matcher = Arc::new(HeuristicEntityMatcher::new(config.known_entities.clone()));

    let pipeline = IngestionPipeline::new(embedder.clone(), store.clone(), config_store.clone());
    let retriever = Arc::new(HybridRetriever::new(
        store.clone(),
        embedder,
        config_store,
        matcher,
    ));
    let auditor = Arc::new(SelectionAuditor::new(database.clone()));

    Ok(Engine {
        pipeline,
        retriever,
        auditor,
        database,
    })
}

fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| TecvaultError::Io {
        source: e,
        context: format!("Failed to read document: {:?}", path),
    })
}

fn facts_for(
    path: &Path,
    equipment: Option<String>,
    manufacturer: Option<String>,
    doc_type: String,
    vault: bool,
) -> DocumentFacts {
    DocumentFacts {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string()),
        equipment,
        manufacturer,
        doc_type,
        source: "externo".to_string(),
        vault_document: vault,
        ..Default::default()
    }
}

async fn cmd_ingest(
    config: &EngineConfig,
    file: &Path,
    equipment: Option<String>,
    manufacturer: Option<String>,
    doc_type: String,
    vault: bool,
    auto_facts: bool,
) -> Result<()> {
    let engine = build_engine(config)?;
    let text = read_document(file)?;

    let facts = if auto_facts && equipment.is_none() && manufacturer.is_none() {
        let generator = RemoteGenerationProvider::new(config.generation.clone())?;
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        DocumentFacts {
            vault_document: vault,
            ..extract_document_facts(&generator, &text, &filename).await
        }
    } else {
        facts_for(file, equipment, manufacturer, doc_type, vault)
    };
    let document_id = Uuid::new_v4();

    let report = engine.pipeline.ingest(document_id, &text, facts).await?;

    println!("✓ Ingested {}", file.display());
    println!("  Document: {}", report.document_id);
    println!("  Chunks:   {}", report.chunk_count);
    println!("  Tokens:   {}", report.tokens_used);
    println!("  Duration: {}ms", report.duration_ms);

    Ok(())
}

async fn ingest_files(engine: &Engine, files: &[PathBuf]) -> Result<Vec<DocumentContext>> {
    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let text = read_document(file)?;
        let facts = facts_for(file, None, None, "otro".to_string(), false);
        let document_id = Uuid::new_v4();
        engine.pipeline.ingest(document_id, &text, facts).await?;
        documents.push(DocumentContext {
            document_id,
            filename: file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".to_string()),
        });
    }
    Ok(documents)
}

async fn cmd_search(
    config: &EngineConfig,
    query: &str,
    files: &[PathBuf],
    top_k: Option<usize>,
    vault_only: bool,
    no_entity_filter: bool,
    json: bool,
) -> Result<()> {
    let engine = build_engine(config)?;
    ingest_files(&engine, files).await?;

    let options = SearchOptions {
        top_k,
        vault_only,
        entity_filter: !no_entity_filter,
        ..Default::default()
    };
    let outcome = engine
        .retriever
        .search(query, &options)
        .await
        .map_err(TecvaultError::Retrieval)?;

    // Audit off the critical path; awaited here so the process does not
    // exit before the row lands
    let handle =
        engine
            .auditor
            .record_detached(&outcome.candidates, &outcome.metadata, query, "search", None);

    if json {
        let accepted: Vec<_> = outcome
            .accepted()
            .map(|c| {
                serde_json::json!({
                    "document": c.facts.filename,
                    "chunk_index": c.chunk.index,
                    "vector_score": c.vector_score,
                    "lexical_score": c.lexical_score,
                    "hybrid_score": c.hybrid_score,
                    "text": c.chunk.text,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&accepted).unwrap_or_default());
    } else {
        println!(
            "{} candidates, {} selected (thresholds: similarity >= {}, hybrid >= {})",
            outcome.metadata.total_candidates,
            outcome.metadata.selected_count,
            outcome.metadata.min_similarity_threshold,
            outcome.metadata.min_hybrid_threshold,
        );
        if !outcome.metadata.detected_entities.is_empty() {
            println!("Entity filter: {:?}", outcome.metadata.detected_entities);
        }
        for candidate in outcome.accepted() {
            println!(
                "\n#{} [{}] hybrid={:.3} vector={:.3} lexical={:.3}",
                candidate.rank,
                candidate.facts.filename,
                candidate.hybrid_score,
                candidate.vector_score,
                candidate.lexical_score,
            );
            let preview: String = candidate.chunk.text.chars().take(240).collect();
            println!("{preview}");
        }
    }

    let _ = handle.await;
    Ok(())
}

async fn cmd_analyze(
    config: &EngineConfig,
    tasks_path: &Path,
    analysis_type: &str,
    standard: bool,
    files: &[PathBuf],
) -> Result<()> {
    let engine = build_engine(config)?;
    let tasks = load_tasks(tasks_path)?;
    let documents = ingest_files(&engine, files).await?;

    let generator = Arc::new(RemoteGenerationProvider::new(config.generation.clone())?);
    let analyzer = ParallelAnalyzer::new(engine.retriever.clone(), generator)
        .with_auditor(engine.auditor.clone())
        .with_database(engine.database.clone());

    let tier = if standard {
        ModelTier::Standard
    } else {
        ModelTier::Mini
    };
    let run = analyzer.run(&documents, &tasks, analysis_type, tier).await;

    println!(
        "Analysis {} over {} documents: {} tasks, {} succeeded, {} failed, {} tokens, {}ms",
        run.analysis_type,
        documents.len(),
        run.task_reports.len(),
        run.stats.succeeded,
        run.stats.failed,
        run.stats.tokens_total,
        run.stats.total_duration_ms,
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&run.consolidated).unwrap_or_default()
    );

    Ok(())
}

async fn cmd_config(config: &EngineConfig, action: ConfigAction) -> Result<()> {
    let database = Arc::new(Database::new(&config.database_path)?);
    let store = ConfigStore::new(database)?;

    match action {
        ConfigAction::Show => {
            let snapshot = store.snapshot().await?;
            let mut keys: Vec<_> = snapshot.keys().collect();
            keys.sort();
            for key in keys {
                let entry = &snapshot[key];
                let bounds = match (entry.min_value, entry.max_value) {
                    (Some(min), Some(max)) => format!(" [{min}..{max}]"),
                    _ => String::new(),
                };
                println!(
                    "{:<18} = {:<8} ({}){}  {}",
                    entry.key,
                    entry.value,
                    entry.value_type.as_str(),
                    bounds,
                    entry.description,
                );
            }
        }
        ConfigAction::Set { key, value } => {
            let outcomes = store
                .update(&[(key, value)], Some("cli"))
                .await?;
            for outcome in outcomes {
                if outcome.success {
                    println!(
                        "✓ {} = {}",
                        outcome.key,
                        outcome.new_value.unwrap_or_default()
                    );
                } else {
                    println!(
                        "✗ {}: {}",
                        outcome.key,
                        outcome.error.unwrap_or_default()
                    );
                }
            }
        }
        ConfigAction::History { limit } => {
            for change in store.history(limit)? {
                println!(
                    "{}  {} : {} -> {} ({})",
                    change.changed_at,
                    change.key,
                    change.old_value.unwrap_or_else(|| "-".to_string()),
                    change.new_value,
                    change.changed_by.unwrap_or_else(|| "-".to_string()),
                );
            }
        }
        ConfigAction::Reset => {
            let outcomes = store.reset_to_defaults(Some("cli")).await?;
            println!("✓ Reset {} keys to defaults", outcomes.len());
        }
    }

    Ok(())
}

fn cmd_stats(config: &EngineConfig) -> Result<()> {
    let database = Database::new(&config.database_path)?;
    let stats = database.stats()?;

    println!("Tecvault database");
    println!("  Config keys:       {}", stats.config_keys);
    println!("  Selection records: {}", stats.selection_records);
    println!("  Analysis runs:     {}", stats.analysis_runs);

    Ok(())
}
