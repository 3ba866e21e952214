//! Text-generation service client
//!
//! Features:
//! - `LlmBackend` trait for pluggable chat backends
//! - OpenAI-compatible HTTP backend (chat completions)
//! - Deterministic scripted backend for tests
//! - Query-rewrite prompt construction

pub mod backend;
pub mod prompt;

pub use backend::{
    FinishReason, GenerationResult, LlmBackend, LlmConfig, OpenAiBackend, ScriptedBackend,
};
pub use prompt::{rewrite_messages, Message, Role};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for rag_engine_core::Error {
    fn from(err: LlmError) -> Self {
        rag_engine_core::Error::Llm(err.to_string())
    }
}
