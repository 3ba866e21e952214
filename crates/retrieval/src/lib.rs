//! Dual-stage retrieval over local knowledge bases
//!
//! Features:
//! - Flat inner-product vector index with JSON persistence
//! - Knowledge-base bundles (documents + tag vocabulary + two indices)
//!   with a name registry
//! - LLM query rewriting into sub-queries with a tolerant parse cascade
//! - Concurrent sub-query search against the summary index
//! - Key-query search against the tag index with tag-to-document expansion
//! - Set-union candidate merging and cross-encoder reranking
//!
//! Every upstream service failure inside one retrieval call degrades to a
//! best-effort result; only a missing or corrupt knowledge base is fatal.

pub mod embeddings;
pub mod kb_store;
pub mod query_rewrite;
pub mod reranker;
pub mod retriever;
pub mod vector_index;

pub use embeddings::{EmbeddingConfig, EmbeddingProvider, HashEmbedder, HttpEmbedder};
pub use kb_store::{KnowledgeBase, KnowledgeBaseBuilder, KnowledgeBaseStore};
pub use query_rewrite::QueryRewriter;
pub use reranker::{HttpReranker, RerankBackend, RerankConfig, RerankScore, Reranker};
pub use retriever::{DualStageRetriever, RetrieveOptions, RetrieverConfig};
pub use vector_index::VectorIndex;

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Knowledge base not found: {0}")]
    NotFound(String),

    #[error("Knowledge base corrupted: {0}")]
    Corruption(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<RetrievalError> for rag_engine_core::Error {
    fn from(err: RetrievalError) -> Self {
        rag_engine_core::Error::Retrieval(err.to_string())
    }
}
