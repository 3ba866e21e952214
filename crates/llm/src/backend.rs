//! LLM backend implementations
//!
//! The HTTP backend speaks the OpenAI-compatible chat completions API, so
//! one client covers both locally served and hosted models.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use rag_engine_config::constants::{endpoints, models, timeouts};

use crate::prompt::Message;
use crate::LlmError;

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model name/ID
    pub model: String,
    /// OpenAI-compatible API endpoint (ending in `/v1`)
    pub endpoint: String,
    /// API key (optional, local servers accept any value)
    pub api_key: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Temperature
    pub temperature: f32,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: models::LLM_DEFAULT.to_string(),
            endpoint: endpoints::OPENAI_COMPAT_DEFAULT.to_string(),
            api_key: None,
            max_tokens: 1024,
            temperature: 0.7,
            timeout: Duration::from_millis(timeouts::LLM_REQUEST_MS),
        }
    }
}

/// LLM generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Generated text
    pub text: String,
    /// Tokens generated (0 when the server reports no usage)
    pub tokens: usize,
    /// Total generation time (ms)
    pub total_time_ms: u64,
    /// Finish reason
    pub finish_reason: FinishReason,
}

/// Finish reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

/// LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a response
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError>;

    /// Check if the backend is reachable
    async fn is_available(&self) -> bool;

    /// Get model name
    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    completion_tokens: usize,
}

/// OpenAI-compatible chat backend
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    config: LlmConfig,
}

impl OpenAiBackend {
    /// Create a new backend
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.config.endpoint);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref api_key) = self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!(
                "Chat completion failed: {status} - {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices returned".to_string()))?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::Length,
            Some("stop") | None => FinishReason::Stop,
            Some(_) => FinishReason::Error,
        };

        Ok(GenerationResult {
            text: choice.message.content,
            tokens: parsed.usage.map(|u| u.completion_tokens).unwrap_or(0),
            total_time_ms: start.elapsed().as_millis() as u64,
            finish_reason,
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Deterministic backend for tests and offline runs.
///
/// Cycles through a fixed list of canned responses; with no responses it
/// fails every call, which exercises the degraded paths downstream.
pub struct ScriptedBackend {
    replies: Vec<String>,
    cursor: AtomicUsize,
    model: String,
}

impl ScriptedBackend {
    /// Backend that answers calls from `replies`, cycling when exhausted.
    pub fn with_responses(replies: Vec<String>) -> Self {
        Self {
            replies,
            cursor: AtomicUsize::new(0),
            model: "scripted".to_string(),
        }
    }

    /// Backend whose every call fails with a network error.
    pub fn failing() -> Self {
        Self::with_responses(Vec::new())
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
        if self.replies.is_empty() {
            return Err(LlmError::Network("scripted failure".to_string()));
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        Ok(GenerationResult {
            text: self.replies[index].clone(),
            tokens: 0,
            total_time_ms: 0,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn is_available(&self) -> bool {
        !self.replies.is_empty()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
