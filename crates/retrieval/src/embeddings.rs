//! Embedding service client
//!
//! Talks to an OpenAI-compatible `/embeddings` endpoint. Single-text
//! embedding surfaces transport failures to the caller (the retriever
//! decides how to degrade); batch embedding is the ingestion path and
//! degrades a failed chunk to zero vectors instead of aborting the build.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use rag_engine_config::constants::{embedding, endpoints, models, timeouts};

use crate::vector_index::l2_normalize;
use crate::RetrievalError;

/// Embedding client configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API endpoint (ending in `/v1`)
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Vector dimension the model produces
    pub dimension: usize,
    /// Batch size for bulk embedding
    pub batch_size: usize,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::OPENAI_COMPAT_DEFAULT.to_string(),
            model: models::EMBEDDING_DEFAULT.to_string(),
            dimension: embedding::DIMENSION,
            batch_size: embedding::BATCH_SIZE,
            timeout: Duration::from_millis(timeouts::EMBEDDING_REQUEST_MS),
        }
    }
}

/// Embedding provider trait
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text. Transport failures surface as
    /// `RetrievalError::Upstream`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    /// Embed many texts, one vector per input in input order. A failed
    /// chunk degrades to zero vectors rather than failing the whole call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    /// Embedding dimension.
    fn dim(&self) -> usize;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP embedder against an OpenAI-compatible endpoint
pub struct HttpEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    /// Create a new embedder
    pub fn new(config: EmbeddingConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RetrievalError::Upstream(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: inputs,
        };

        let url = format!("{}/embeddings", self.config.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::Upstream(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Upstream(format!(
                "Embedding request failed: {status} - {body}"
            )));
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            RetrievalError::Upstream(format!("Failed to parse embedding response: {e}"))
        })?;

        if parsed.data.len() != inputs.len() {
            return Err(RetrievalError::Upstream(format!(
                "Embedding response has {} vectors for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }

        // The `index` field ties each vector to its input position
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for entry in data {
            if entry.embedding.len() != self.config.dimension {
                return Err(RetrievalError::Upstream(format!(
                    "Embedding has dimension {} (expected {})",
                    entry.embedding.len(),
                    self.config.dimension
                )));
            }
            vectors.push(entry.embedding);
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let inputs = [text.to_string()];
        let mut vectors = self.request(&inputs).await?;
        vectors
            .pop()
            .ok_or_else(|| RetrievalError::Upstream("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut all_vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            match self.request(chunk).await {
                Ok(vectors) => all_vectors.extend(vectors),
                Err(e) => {
                    tracing::warn!(
                        chunk_size = chunk.len(),
                        error = %e,
                        "Embedding batch failed, substituting zero vectors"
                    );
                    all_vectors
                        .extend(std::iter::repeat(vec![0.0; self.config.dimension]).take(chunk.len()));
                },
            }
        }

        Ok(all_vectors)
    }

    fn dim(&self) -> usize {
        self.config.dimension
    }
}

/// Deterministic hash-based embedder for tests and offline smoke runs.
///
/// No model required; similar only in the trivial sense that identical
/// texts map to identical vectors.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % self.dimension;
            vector[idx] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dim(&self) -> usize {
        self.dimension
    }
}
