//! Parallel fan-out/fan-in over prompt tasks and documents
//!
//! Every task retrieves its own context per document and gets one
//! generation call over the combined context. Tasks run concurrently under
//! a fixed concurrency limit so a large analysis cannot flood the model
//! provider. A failed task lands as an error marker in its own field; the
//! run as a whole always completes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::generation::{parse_model_response, GenerationProvider, ModelTier};
use crate::metadata::DocumentContext;
use crate::retrieval::{HybridRetriever, SearchOptions, SelectionAuditor};
use crate::storage::Database;

use super::{build_rag_prompt, AnalysisRun, PromptTask, RunStats, TaskReport};

/// Fixed limit on concurrently running tasks
const MAX_CONCURRENT_TASKS: usize = 8;

/// Fan-out orchestrator over retrieval and generation
pub struct ParallelAnalyzer {
    retriever: Arc<HybridRetriever>,
    generator: Arc<dyn GenerationProvider>,
    auditor: Option<Arc<SelectionAuditor>>,
    database: Option<Arc<Database>>,
}

impl ParallelAnalyzer {
    pub fn new(retriever: Arc<HybridRetriever>, generator: Arc<dyn GenerationProvider>) -> Self {
        Self {
            retriever,
            generator,
            auditor: None,
            database: None,
        }
    }

    /// Record per-task retrieval selections in the audit trail
    pub fn with_auditor(mut self, auditor: Arc<SelectionAuditor>) -> Self {
        self.auditor = Some(auditor);
        self
    }

    /// Persist completed runs as a single row
    pub fn with_database(mut self, database: Arc<Database>) -> Self {
        self.database = Some(database);
        self
    }

    /// Execute every task against every document and consolidate.
    ///
    /// Never fails wholesale: task failures are embedded per field and
    /// counted in the run statistics.
    pub async fn run(
        &self,
        documents: &[DocumentContext],
        tasks: &[PromptTask],
        analysis_type: &str,
        tier: ModelTier,
    ) -> AnalysisRun {
        let started = Instant::now();
        info!(
            analysis_type,
            tasks = tasks.len(),
            documents = documents.len(),
            tier = tier.as_str(),
            "starting parallel analysis"
        );

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_TASKS));
        let mut join_set = JoinSet::new();

        for task in tasks.iter().cloned() {
            let semaphore = semaphore.clone();
            let retriever = self.retriever.clone();
            let generator = self.generator.clone();
            let auditor = self.auditor.clone();
            let documents = documents.to_vec();

            join_set.spawn(async move {
                // Closing the semaphore is not part of this flow, so the
                // acquire cannot fail
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                execute_task(retriever, generator, auditor, &documents, &task, tier).await
            });
        }

        let mut reports_by_id: HashMap<String, TaskReport> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => {
                    reports_by_id.insert(report.task_id.clone(), report);
                }
                Err(e) => error!(error = %e, "analysis task aborted"),
            }
        }

        // Consolidate in declared task order, one field per task no matter
        // how many calls failed
        let mut task_reports = Vec::with_capacity(tasks.len());
        let mut consolidated = Map::new();
        for task in tasks {
            let report = reports_by_id
                .remove(&task.id)
                .unwrap_or_else(|| TaskReport::failed(task, "Task aborted", 0));
            consolidated.insert(task.result_field.clone(), consolidated_value(&report));
            task_reports.push(report);
        }

        let stats = run_stats(&task_reports, started.elapsed().as_millis() as u64);
        info!(
            analysis_type,
            duration_ms = stats.total_duration_ms,
            tokens = stats.tokens_total,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "parallel analysis completed"
        );

        let run = AnalysisRun {
            id: Uuid::new_v4(),
            analysis_type: analysis_type.to_string(),
            model_tier: tier,
            task_reports,
            consolidated,
            stats,
        };

        if let Some(database) = &self.database {
            if let Err(e) = database.insert_analysis_run(&run) {
                warn!(run_id = %run.id, error = %e, "failed to persist analysis run");
            }
        }

        run
    }

    /// Variant without retrieval: every task answers over the same
    /// pre-assembled context. Used when the documents fit in context whole.
    pub async fn run_simple(
        &self,
        context: &str,
        tasks: &[PromptTask],
        analysis_type: &str,
        tier: ModelTier,
    ) -> AnalysisRun {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_TASKS));
        let mut join_set = JoinSet::new();

        for task in tasks.iter().cloned() {
            let semaphore = semaphore.clone();
            let generator = self.generator.clone();
            let context = context.to_string();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                generate_for_task(generator.as_ref(), &context, &task, tier, 0, 0).await
            });
        }

        let mut reports_by_id: HashMap<String, TaskReport> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => {
                    reports_by_id.insert(report.task_id.clone(), report);
                }
                Err(e) => error!(error = %e, "analysis task aborted"),
            }
        }

        let mut task_reports = Vec::with_capacity(tasks.len());
        let mut consolidated = Map::new();
        for task in tasks {
            let report = reports_by_id
                .remove(&task.id)
                .unwrap_or_else(|| TaskReport::failed(task, "Task aborted", 0));
            consolidated.insert(task.result_field.clone(), consolidated_value(&report));
            task_reports.push(report);
        }

        let stats = run_stats(&task_reports, started.elapsed().as_millis() as u64);
        let run = AnalysisRun {
            id: Uuid::new_v4(),
            analysis_type: analysis_type.to_string(),
            model_tier: tier,
            task_reports,
            consolidated,
            stats,
        };

        if let Some(database) = &self.database {
            if let Err(e) = database.insert_analysis_run(&run) {
                warn!(run_id = %run.id, error = %e, "failed to persist analysis run");
            }
        }

        run
    }
}

/// Retrieve per-document context for one task, then answer it
async fn execute_task(
    retriever: Arc<HybridRetriever>,
    generator: Arc<dyn GenerationProvider>,
    auditor: Option<Arc<SelectionAuditor>>,
    documents: &[DocumentContext],
    task: &PromptTask,
    tier: ModelTier,
) -> TaskReport {
    let started = Instant::now();
    let mut context_parts = Vec::with_capacity(documents.len());
    let mut chunks_used = 0usize;

    for document in documents {
        let options = SearchOptions::scoped_to(document.document_id);
        let outcome = match retriever.search(&task.question, &options).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task = %task.id, document = %document.document_id, error = %e, "task retrieval failed");
                return TaskReport::failed(task, &e.to_string(), started.elapsed().as_millis() as u64);
            }
        };

        if let Some(auditor) = &auditor {
            let _ = auditor.record_detached(
                &outcome.candidates,
                &outcome.metadata,
                &task.question,
                "analysis",
                Some(&task.id),
            );
        }

        let chunk_texts: Vec<&str> = outcome.accepted().map(|c| c.chunk.text.as_str()).collect();
        chunks_used += chunk_texts.len();
        context_parts.push(format!("[{}]:\n{}", document.filename, chunk_texts.join("\n\n")));
    }

    let combined = context_parts.join("\n\n---\n\n");
    generate_for_task(
        generator.as_ref(),
        &combined,
        task,
        tier,
        chunks_used,
        documents.len(),
    )
    .await
}

async fn generate_for_task(
    generator: &dyn GenerationProvider,
    context: &str,
    task: &PromptTask,
    tier: ModelTier,
    chunks_used: usize,
    documents_consulted: usize,
) -> TaskReport {
    let started = Instant::now();
    let prompt = build_rag_prompt(context, &task.question);

    match generator.complete(&prompt, tier).await {
        Ok(completion) => {
            let response = parse_model_response(&completion.text);
            TaskReport {
                task_id: task.id.clone(),
                question: task.question.clone(),
                result_field: task.result_field.clone(),
                response,
                succeeded: true,
                duration_ms: started.elapsed().as_millis() as u64,
                tokens_in: completion.tokens_in,
                tokens_out: completion.tokens_out,
                chunks_used,
                documents_consulted,
            }
        }
        Err(e) => {
            error!(task = %task.id, error = %e, "task generation failed");
            TaskReport::failed(task, &e.to_string(), started.elapsed().as_millis() as u64)
        }
    }
}

/// Field value merged into the consolidated result: the declared field of
/// the parsed answer when present, otherwise the whole answer
fn consolidated_value(report: &TaskReport) -> Value {
    if !report.succeeded {
        return report.response.clone();
    }
    report
        .response
        .get(&report.result_field)
        .cloned()
        .unwrap_or_else(|| report.response.clone())
}

fn run_stats(reports: &[TaskReport], total_duration_ms: u64) -> RunStats {
    let succeeded = reports.iter().filter(|r| r.succeeded).count();
    RunStats {
        total_duration_ms,
        avg_task_duration_ms: if reports.is_empty() {
            0
        } else {
            total_duration_ms / reports.len() as u64
        },
        tokens_in: reports.iter().map(|r| r.tokens_in).sum(),
        tokens_out: reports.iter().map(|r| r.tokens_out).sum(),
        tokens_total: reports.iter().map(|r| r.tokens_in + r.tokens_out).sum(),
        chunks_used: reports.iter().map(|r| r.chunks_used).sum(),
        succeeded,
        failed: reports.len() - succeeded,
    }
}
