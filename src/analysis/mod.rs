//! Structured analysis over prompt tasks
//!
//! An analysis type is a set of independent sub-questions defined in
//! configuration, each declaring the field its answer lands in. The
//! orchestrator fans the tasks out over the input documents and merges
//! their answers into one consolidated result.

mod orchestrator;

pub use orchestrator::ParallelAnalyzer;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, TecvaultError};
use crate::generation::ModelTier;

/// One sub-question of a structured analysis. Stateless, defined by
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTask {
    pub id: String,
    /// The question sent to the model, including the expected JSON shape
    pub question: String,
    /// Field the answer is merged under in the consolidated result
    pub result_field: String,
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    task: Vec<PromptTask>,
}

/// Load the prompt tasks for an analysis type from a TOML file
pub fn load_tasks(path: &std::path::Path) -> Result<Vec<PromptTask>> {
    let content = std::fs::read_to_string(path).map_err(|e| TecvaultError::Io {
        source: e,
        context: format!("Failed to read task file: {:?}", path),
    })?;
    let file: TaskFile = toml::from_str(&content)?;
    if file.task.is_empty() {
        return Err(TecvaultError::Config(format!(
            "Task file defines no tasks: {:?}",
            path
        )));
    }
    Ok(file.task)
}

/// Frame a task question over retrieved context, demanding strict JSON
pub fn build_rag_prompt(context: &str, question: &str) -> String {
    format!(
        "Eres un asistente técnico experto. Responde basándote ÚNICAMENTE en el siguiente contexto.\n\n\
         CONTEXTO:\n{context}\n\n\
         PREGUNTA:\n{question}\n\n\
         IMPORTANTE:\n\
         - Responde ÚNICAMENTE con un JSON válido\n\
         - NO incluyas markdown (triple backticks con json) ni texto adicional\n\
         - Si no encuentras información relevante, devuelve un objeto JSON vacío con la estructura solicitada\n\
         - Sé específico y conciso"
    )
}

/// Outcome of one prompt task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub question: String,
    pub result_field: String,
    /// Parsed model answer, or `{"error": ...}` when the task failed
    pub response: Value,
    pub succeeded: bool,
    pub duration_ms: u64,
    pub tokens_in: usize,
    pub tokens_out: usize,
    pub chunks_used: usize,
    pub documents_consulted: usize,
}

impl TaskReport {
    pub fn failed(task: &PromptTask, error: &str, duration_ms: u64) -> Self {
        Self {
            task_id: task.id.clone(),
            question: task.question.clone(),
            result_field: task.result_field.clone(),
            response: serde_json::json!({ "error": error }),
            succeeded: false,
            duration_ms,
            tokens_in: 0,
            tokens_out: 0,
            chunks_used: 0,
            documents_consulted: 0,
        }
    }
}

/// Aggregate statistics of one analysis run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_duration_ms: u64,
    pub avg_task_duration_ms: u64,
    pub tokens_in: usize,
    pub tokens_out: usize,
    pub tokens_total: usize,
    pub chunks_used: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The aggregate of executing all prompt tasks across all input documents
/// for one analysis request. Assembled once, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub analysis_type: String,
    pub model_tier: ModelTier,
    pub task_reports: Vec<TaskReport>,
    /// One field per task, keyed by the task's declared result field
    pub consolidated: Map<String, Value>,
    pub stats: RunStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_tasks_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.toml");
        std::fs::write(
            &path,
            r#"
[[task]]
id = "alcance"
question = "Extrae el alcance del contrato."
result_field = "alcance"

[[task]]
id = "plazos"
question = "Extrae los plazos de entrega."
result_field = "plazos"
"#,
        )
        .unwrap();

        let tasks = load_tasks(&path).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "alcance");
        assert_eq!(tasks[1].result_field, "plazos");
    }

    #[test]
    fn test_empty_task_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.toml");
        std::fs::write(&path, "").unwrap();
        assert!(load_tasks(&path).is_err());
    }

    #[test]
    fn test_rag_prompt_contains_context_and_question() {
        let prompt = build_rag_prompt("[doc.pdf]:\ncontenido", "¿Cuál es el alcance?");
        assert!(prompt.contains("CONTEXTO:\n[doc.pdf]:\ncontenido"));
        assert!(prompt.contains("PREGUNTA:\n¿Cuál es el alcance?"));
        assert!(prompt.contains("JSON válido"));
    }

    #[test]
    fn test_failed_report_shape() {
        let task = PromptTask {
            id: "t1".to_string(),
            question: "q".to_string(),
            result_field: "campo".to_string(),
        };
        let report = TaskReport::failed(&task, "model unavailable", 12);
        assert!(!report.succeeded);
        assert_eq!(report.response["error"], "model unavailable");
        assert_eq!(report.tokens_in + report.tokens_out, 0);
    }
}
