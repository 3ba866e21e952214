//! Centralized constants
//!
//! Single source of truth for default values used across the workspace.
//! Runtime configuration (`Settings`) starts from these and may override
//! any of them per deployment.

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// OpenAI-compatible endpoint serving chat completions and embeddings
    pub const OPENAI_COMPAT_DEFAULT: &str = "http://localhost:9997/v1";

    /// Rerank service endpoint
    pub const RERANK_DEFAULT: &str = "http://localhost:9997";
}

/// Model identifiers
pub mod models {
    /// Chat model used for query rewriting
    pub const LLM_DEFAULT: &str = "qwen2.5-instruct";

    /// Embedding model
    pub const EMBEDDING_DEFAULT: &str = "bge-m3";

    /// Cross-encoder rerank model
    pub const RERANK_DEFAULT: &str = "bge-reranker-v2-m3";
}

/// Embedding defaults
pub mod embedding {
    /// Vector dimension produced by the default embedding model
    pub const DIMENSION: usize = 1024;

    /// Batch size for bulk embedding calls
    pub const BATCH_SIZE: usize = 32;
}

/// Retrieval defaults
pub mod retrieval {
    /// Results kept per sub-query against the summary index
    pub const SUB_QUERY_TOP_K: usize = 5;

    /// Score fraction of the best hit a summary result must reach
    pub const SUB_QUERY_TOP_P: f32 = 0.85;

    /// Results kept for the key query against the tag index
    pub const KEY_QUERY_TOP_K: usize = 5;

    /// Score fraction of the best hit a tag result must reach
    pub const KEY_QUERY_TOP_P: f32 = 0.8;

    /// Maximum documents returned from one retrieval call
    pub const FINAL_TOP_K: usize = 15;

    /// Bound on concurrent sub-query search tasks
    pub const MAX_CONCURRENT_SUB_QUERIES: usize = 8;
}

/// Request timeouts (milliseconds)
pub mod timeouts {
    /// Chat completion request timeout
    pub const LLM_REQUEST_MS: u64 = 60_000;

    /// Embedding request timeout
    pub const EMBEDDING_REQUEST_MS: u64 = 30_000;

    /// Rerank request timeout
    pub const RERANK_REQUEST_MS: u64 = 30_000;
}
