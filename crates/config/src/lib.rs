//! Configuration for the retrieval engine
//!
//! Provides:
//! - Centralized default constants (endpoints, model ids, retrieval knobs)
//! - Layered `Settings` loaded from an optional file plus environment
//!   variable overrides
//!
//! There is no process-wide mutable configuration: every component takes
//! its configuration struct at construction time.

pub mod constants;
pub mod settings;

pub use settings::{
    EmbeddingSettings, KnowledgeBaseSettings, LlmSettings, RerankSettings, RetrievalSettings,
    Settings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

impl From<ConfigError> for rag_engine_core::Error {
    fn from(err: ConfigError) -> Self {
        rag_engine_core::Error::Config(err.to_string())
    }
}
