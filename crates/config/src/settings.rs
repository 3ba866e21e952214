//! Layered settings
//!
//! Settings load from an optional file (TOML/YAML/JSON by extension) with
//! environment variable overrides under the `RAG_ENGINE_` prefix, e.g.
//! `RAG_ENGINE_LLM__ENDPOINT=http://10.0.0.5:9997/v1`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{embedding, endpoints, models, retrieval, timeouts};
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Chat model used for query rewriting
    #[serde(default)]
    pub llm: LlmSettings,

    /// Embedding service
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Rerank service
    #[serde(default)]
    pub rerank: RerankSettings,

    /// Retrieval knobs
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Knowledge-base storage
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseSettings,
}

impl Settings {
    /// Load settings from an optional file plus environment overrides.
    ///
    /// A missing file is not an error; defaults apply for every value not
    /// provided by the file or the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("RAG_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }
}

/// Chat model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_llm_endpoint() -> String {
    endpoints::OPENAI_COMPAT_DEFAULT.to_string()
}

fn default_llm_model() -> String {
    models::LLM_DEFAULT.to_string()
}

fn default_llm_timeout_ms() -> u64 {
    timeouts::LLM_REQUEST_MS
}

fn default_max_tokens() -> usize {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout_ms: default_llm_timeout_ms(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Embedding service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_embedding_endpoint() -> String {
    endpoints::OPENAI_COMPAT_DEFAULT.to_string()
}

fn default_embedding_model() -> String {
    models::EMBEDDING_DEFAULT.to_string()
}

fn default_embedding_dimension() -> usize {
    embedding::DIMENSION
}

fn default_embedding_batch_size() -> usize {
    embedding::BATCH_SIZE
}

fn default_embedding_timeout_ms() -> u64 {
    timeouts::EMBEDDING_REQUEST_MS
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

/// Rerank service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankSettings {
    #[serde(default = "default_rerank_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_rerank_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rerank_endpoint() -> String {
    endpoints::RERANK_DEFAULT.to_string()
}

fn default_rerank_model() -> String {
    models::RERANK_DEFAULT.to_string()
}

fn default_rerank_timeout_ms() -> u64 {
    timeouts::RERANK_REQUEST_MS
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            endpoint: default_rerank_endpoint(),
            model: default_rerank_model(),
            timeout_ms: default_rerank_timeout_ms(),
        }
    }
}

/// Retrieval knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    #[serde(default = "default_sub_query_top_k")]
    pub sub_query_top_k: usize,
    #[serde(default = "default_sub_query_top_p")]
    pub sub_query_top_p: f32,
    #[serde(default = "default_key_query_top_k")]
    pub key_query_top_k: usize,
    #[serde(default = "default_key_query_top_p")]
    pub key_query_top_p: f32,
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,
    #[serde(default = "default_do_rerank")]
    pub do_rerank: bool,
    #[serde(default = "default_max_concurrent_sub_queries")]
    pub max_concurrent_sub_queries: usize,
}

fn default_sub_query_top_k() -> usize {
    retrieval::SUB_QUERY_TOP_K
}

fn default_sub_query_top_p() -> f32 {
    retrieval::SUB_QUERY_TOP_P
}

fn default_key_query_top_k() -> usize {
    retrieval::KEY_QUERY_TOP_K
}

fn default_key_query_top_p() -> f32 {
    retrieval::KEY_QUERY_TOP_P
}

fn default_final_top_k() -> usize {
    retrieval::FINAL_TOP_K
}

fn default_do_rerank() -> bool {
    true
}

fn default_max_concurrent_sub_queries() -> usize {
    retrieval::MAX_CONCURRENT_SUB_QUERIES
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            sub_query_top_k: default_sub_query_top_k(),
            sub_query_top_p: default_sub_query_top_p(),
            key_query_top_k: default_key_query_top_k(),
            key_query_top_p: default_key_query_top_p(),
            final_top_k: default_final_top_k(),
            do_rerank: default_do_rerank(),
            max_concurrent_sub_queries: default_max_concurrent_sub_queries(),
        }
    }
}

/// Knowledge-base storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseSettings {
    /// Directory holding one bundle directory per knowledge base plus the
    /// registry file
    #[serde(default = "default_kb_root")]
    pub root: PathBuf,
}

fn default_kb_root() -> PathBuf {
    PathBuf::from("data/knowledge_bases")
}

impl Default for KnowledgeBaseSettings {
    fn default() -> Self {
        Self {
            root: default_kb_root(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.retrieval.sub_query_top_k, 5);
        assert!((settings.retrieval.sub_query_top_p - 0.85).abs() < f32::EPSILON);
        assert_eq!(settings.retrieval.final_top_k, 15);
        assert_eq!(settings.embedding.dimension, 1024);
        assert!(settings.retrieval.do_rerank);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let settings = Settings::load(Some(Path::new("does/not/exist.toml"))).unwrap();
        assert_eq!(settings.llm.model, "qwen2.5-instruct");
        assert_eq!(settings.rerank.model, "bge-reranker-v2-m3");
    }

    #[test]
    fn test_load_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[retrieval]\nsub_query_top_k = 9\n\n[llm]\nmodel = \"other-model\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.retrieval.sub_query_top_k, 9);
        assert_eq!(settings.llm.model, "other-model");
        // Untouched values keep their defaults
        assert_eq!(settings.retrieval.final_top_k, 15);
    }
}
