use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::config::env_or;
use crate::embeddings::{Embedding, EmbeddingClient};
use crate::error::{EmbeddingError, GenerationError};
use crate::generation::{GenerationClient, GenerationParams, SafetyLevel};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that mean the candidate was withheld by a content filter
const BLOCKING_FINISH_REASONS: [&str; 4] = ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Configuration for Gemini API
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub embedding_batch_size: usize,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    /// Configuration with default models and endpoints
    pub fn new(api_key: impl Into<String>) -> Self {
        GeminiConfig {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            embedding_dimension: 768,
            embedding_batch_size: 100,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY").context("Missing GEMINI_API_KEY")?;
        let defaults = GeminiConfig::new(api_key);

        Ok(GeminiConfig {
            base_url: env_or("GEMINI_BASE_URL", defaults.base_url.clone())?,
            model: env_or("GEMINI_MODEL", defaults.model.clone())?,
            embedding_model: env_or("GEMINI_EMBEDDING_MODEL", defaults.embedding_model.clone())?,
            embedding_dimension: env_or("EMBEDDING_DIMENSION", defaults.embedding_dimension)?,
            embedding_batch_size: env_or("EMBEDDING_BATCH_SIZE", defaults.embedding_batch_size)?,
            request_timeout: Duration::from_secs(env_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            ..defaults
        })
    }
}

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build Gemini HTTP client")?;
        Ok(GeminiClient { config, client })
    }

    /// Get the client configuration
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.config.base_url.trim_end_matches('/'),
            model,
            method,
            self.config.api_key
        )
    }

    /// Embed one provider-sized batch
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let model = format!("models/{}", self.config.embedding_model);
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &model,
                    content: Content::new(text, None),
                    output_dimensionality: self.config.embedding_dimension,
                })
                .collect(),
        };

        let url = self.endpoint(&self.config.embedding_model, "batchEmbedContents");
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout(self.config.request_timeout)
                } else {
                    EmbeddingError::Service(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("{} {}", status, error_text);
            return Err(if is_transient(status) {
                EmbeddingError::Service(message)
            } else {
                EmbeddingError::Rejected(message)
            });
        }

        let response_data: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        into_embeddings(response_data, texts.len(), self.config.embedding_dimension)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn into_embeddings(
    response: BatchEmbedResponse,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Embedding>, EmbeddingError> {
    if response.embeddings.len() != expected {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected,
            response.embeddings.len()
        )));
    }

    response
        .embeddings
        .into_iter()
        .map(|data| {
            if data.values.len() == dimension {
                Ok(Embedding::new(data.values))
            } else {
                Err(EmbeddingError::InvalidResponse(format!(
                    "expected dimension {}, got {}",
                    dimension,
                    data.values.len()
                )))
            }
        })
        .collect()
}

#[async_trait]
impl EmbeddingClient for GeminiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embedding_batch_size.max(1)) {
            debug!("Embedding batch of {} texts", batch.len());
            embeddings.extend(self.embed_batch(batch).await?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        context: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        let full_prompt = compose_prompt(prompt, context);
        let request = GenerateRequest {
            contents: vec![Content::new(&full_prompt, Some("user"))],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: params.top_k,
                max_output_tokens: params.max_output_tokens,
            },
            safety_settings: safety_settings(params.safety),
        };

        let url = self.endpoint(&self.config.model, "generateContent");
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.config.request_timeout)
                } else {
                    GenerationError::Service(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("API request failed: {} {}", status, error_text);
            return Err(if is_transient(status) {
                GenerationError::Service(message)
            } else {
                GenerationError::Rejected(message)
            });
        }

        let response_data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        extract_text(response_data)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Place the supporting context ahead of the instructions
fn compose_prompt(prompt: &str, context: &str) -> String {
    if context.trim().is_empty() {
        prompt.to_string()
    } else {
        format!("Context:\n{}\n\n{}", context, prompt)
    }
}

fn safety_settings(level: SafetyLevel) -> Vec<SafetySetting> {
    let threshold = match level {
        SafetyLevel::Strict => "BLOCK_MEDIUM_AND_ABOVE",
        SafetyLevel::Permissive => "BLOCK_ONLY_HIGH",
    };
    HARM_CATEGORIES
        .iter()
        .map(|&category| SafetySetting {
            category,
            threshold,
        })
        .collect()
}

/// Pull the generated text out of a response, distinguishing filtered output
fn extract_text(response: GenerateResponse) -> Result<String, GenerationError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::Blocked { reason });
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::InvalidResponse("No response generated".to_string()))?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text.trim().to_string());
    }

    match candidate.finish_reason {
        Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
            Err(GenerationError::Blocked { reason })
        }
        reason => Err(GenerationError::InvalidResponse(format!(
            "empty candidate (finish reason {})",
            reason.as_deref().unwrap_or("unknown")
        ))),
    }
}

// Request/response structures for the Gemini REST API

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    output_dimensionality: usize,
}

#[derive(Deserialize, Debug)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
}

impl<'a> Content<'a> {
    fn new(text: &'a str, role: Option<&'static str>) -> Self {
        Content {
            parts: vec![Part { text }],
            role,
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}
