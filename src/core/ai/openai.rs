//! OpenAI Provider Implementation
//!
//! Implements the AiProvider trait against OpenAI's chat-completion and
//! embedding endpoints. HTTP failures are classified for the retry
//! layer: rate limits, server errors, and timeouts are transient,
//! everything else is permanent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ai::provider::AiProvider;
use crate::core::config::AiProviderConfig;
use crate::core::{PipelineError, PipelineResult};

// =============================================================================
// OpenAI Provider
// =============================================================================

/// OpenAI API provider.
pub struct OpenAiProvider {
    /// API key
    api_key: String,
    /// Base URL for API requests
    base_url: String,
    /// Chat model for summaries
    model: String,
    /// Embedding model
    embedding_model: String,
    /// System prompt for summaries
    system: String,
    /// Per-call instructions prepended to the transcript
    instructions: String,
    /// Embedding batch size
    batch_size: usize,
    /// HTTP client
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Default OpenAI API base URL
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Creates a new OpenAI provider from config. The API key falls back
    /// to the OPENAI_API_KEY environment variable when not configured.
    pub fn new(config: &AiProviderConfig) -> PipelineResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::Config("OpenAI API key is required".to_string()))?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url,
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            system: config.system.clone(),
            instructions: config.instructions.clone(),
            batch_size: config.batch_size.max(1),
            client,
        })
    }

    /// Classifies an HTTP-level failure for the retry layer.
    fn classify_status(status: reqwest::StatusCode, detail: String) -> PipelineError {
        if status.as_u16() == 429 || status.is_server_error() {
            PipelineError::IndexingTransient(format!("OpenAI API error ({}): {}", status, detail))
        } else {
            PipelineError::IndexingPermanent(format!("OpenAI API error ({}): {}", status, detail))
        }
    }

    fn classify_request_error(err: reqwest::Error) -> PipelineError {
        if err.is_timeout() || err.is_connect() {
            PipelineError::IndexingTransient(format!("Request failed: {}", err))
        } else {
            PipelineError::IndexingPermanent(format!("Request failed: {}", err))
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        let api_request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: texts.to_vec(),
        };

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(Self::classify_request_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::IndexingTransient(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Self::classify_status(status, parse_error_detail(&body)));
        }

        let api_response: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            PipelineError::IndexingPermanent(format!("Failed to parse embedding response: {}", e))
        })?;

        let mut data = api_response.data;
        // The API is documented to preserve input order, but it also tags
        // each entry with its index, so sort to be safe.
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

// =============================================================================
// OpenAI API Types
// =============================================================================

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn parse_error_detail(body: &str) -> String {
    serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

// =============================================================================
// AiProvider Implementation
// =============================================================================

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn summarize(&self, transcript: &str) -> PipelineResult<String> {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: self.system.clone(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!("{}\n\n{}", self.instructions, transcript),
            },
        ];

        let api_request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(Self::classify_request_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::IndexingTransient(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Self::classify_status(status, parse_error_detail(&body)));
        }

        let api_response: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            PipelineError::IndexingPermanent(format!("Failed to parse response: {}", e))
        })?;

        let text = api_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(text)
    }

    async fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(chunk).await?);
        }
        Ok(vectors)
    }
}

// =============================================================================
// Tests
// =============================================================================
