//! Generation provider
//!
//! The completion model is consumed as a black-box chat-completions service.
//! Two model tiers are exposed: the standard model for deep analysis and the
//! mini model for high-volume structured extraction.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GenerationProviderConfig;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("Generation response contained no choices")]
    EmptyResponse,
}

/// Which completion model a call should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Full model, deep analysis
    Standard,
    /// Smaller model, high-volume structured extraction
    Mini,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Standard => "standard",
            ModelTier::Mini => "mini",
        }
    }
}

/// One completed generation call
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_in: usize,
    pub tokens_out: usize,
    pub model: String,
}

impl Completion {
    pub fn tokens_total(&self) -> usize {
        self.tokens_in + self.tokens_out
    }
}

/// Trait for completion providers
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn complete(&self, prompt: &str, tier: ModelTier)
        -> Result<Completion, GenerationError>;
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint
pub struct RemoteGenerationProvider {
    client: reqwest::Client,
    config: GenerationProviderConfig,
    api_key: String,
}

impl RemoteGenerationProvider {
    pub fn new(config: GenerationProviderConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| GenerationError::MissingApiKey(config.api_key_env.clone()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            config,
            api_key,
        })
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Standard => &self.config.standard_model,
            ModelTier::Mini => &self.config.mini_model,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

#[async_trait]
impl GenerationProvider for RemoteGenerationProvider {
    async fn complete(
        &self,
        prompt: &str,
        tier: ModelTier,
    ) -> Result<Completion, GenerationError> {
        let model = self.model_for(tier).to_string();
        debug!(model, prompt_length = prompt.len(), "calling generation model");
        let started = std::time::Instant::now();

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json().await?;
        let choice = body.choices.into_iter().next().ok_or(GenerationError::EmptyResponse)?;
        let usage = body.usage.unwrap_or_default();

        info!(
            model,
            duration_ms = started.elapsed().as_millis() as u64,
            tokens = usage.prompt_tokens + usage.completion_tokens,
            "generation response received"
        );

        Ok(Completion {
            text: choice.message.content,
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            model,
        })
    }
}

/// Parse a model response that should be JSON.
///
/// Markdown code fences are stripped first. A response that still does not
/// parse is wrapped as `{"raw_response": <text>}` rather than failing the
/// calling task.
pub fn parse_model_response(text: &str) -> Value {
    let cleaned = text
        .trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string();

    match serde_json::from_str(&cleaned) {
        Ok(value) => value,
        Err(_) => {
            let preview: String = text.chars().take(200).collect();
            warn!(preview, "model response was not valid JSON");
            json!({ "raw_response": text })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let value = parse_model_response(r#"{"alcance": "obra civil"}"#);
        assert_eq!(value["alcance"], "obra civil");
    }

    #[test]
    fn test_parse_strips_markdown_fences() {
        let value = parse_model_response("```json\n{\"total\": 3}\n```");
        assert_eq!(value["total"], 3);
    }

    #[test]
    fn test_parse_invalid_json_wraps_raw() {
        let value = parse_model_response("no structured answer");
        assert_eq!(value["raw_response"], "no structured answer");
    }

    #[test]
    fn test_tier_names() {
        assert_eq!(ModelTier::Standard.as_str(), "standard");
        assert_eq!(ModelTier::Mini.as_str(), "mini");
    }

    #[test]
    fn test_completion_token_total() {
        let completion = Completion {
            text: String::new(),
            tokens_in: 120,
            tokens_out: 30,
            model: "test".to_string(),
        };
        assert_eq!(completion.tokens_total(), 150);
    }
}
