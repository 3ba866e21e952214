//! Cross-encoder reranking
//!
//! Sends the query and candidate contents to a rerank service and maps the
//! returned `(index, relevance_score)` pairs back onto the candidates. A
//! failed rerank call never aborts retrieval: candidates come back in
//! their original order without scores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use rag_engine_config::constants::{endpoints, models, timeouts};
use rag_engine_core::{Document, RankedDocument};

use crate::RetrievalError;

/// Rerank client configuration
#[derive(Debug, Clone)]
pub struct RerankConfig {
    /// Rerank service endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::RERANK_DEFAULT.to_string(),
            model: models::RERANK_DEFAULT.to_string(),
            timeout: Duration::from_millis(timeouts::RERANK_REQUEST_MS),
        }
    }
}

/// One scored candidate, referencing a position in the submitted list.
#[derive(Debug, Clone, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    pub relevance_score: f32,
}

/// Rerank backend trait
#[async_trait]
pub trait RerankBackend: Send + Sync {
    /// Score `documents` against `query`. Entries reference positions in
    /// the input list; order and completeness are the service's choice.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<RerankScore>, RetrievalError>;

    /// Get model name
    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankScore>,
}

/// HTTP rerank backend (xinference-style `/v1/rerank`)
pub struct HttpReranker {
    client: Client,
    config: RerankConfig,
}

impl HttpReranker {
    pub fn new(config: RerankConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RetrievalError::Upstream(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl RerankBackend for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<RerankScore>, RetrievalError> {
        let request = RerankRequest {
            model: &self.config.model,
            query,
            documents,
        };

        let url = format!("{}/v1/rerank", self.config.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::Upstream(format!("Rerank request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Upstream(format!(
                "Rerank request failed: {status} - {body}"
            )));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Upstream(format!("Failed to parse rerank response: {e}")))?;

        Ok(parsed.results)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Reranks retrieved documents through a `RerankBackend`.
pub struct Reranker {
    backend: Arc<dyn RerankBackend>,
}

impl Reranker {
    pub fn new(backend: Arc<dyn RerankBackend>) -> Self {
        Self { backend }
    }

    /// Reorder `documents` by relevance to `query`, descending.
    ///
    /// On a backend failure the input documents come back unscored in
    /// their original order. Score entries referencing positions outside
    /// the input list are skipped.
    pub async fn rerank(&self, query: &str, documents: Vec<Document>) -> Vec<RankedDocument> {
        if documents.is_empty() {
            return Vec::new();
        }

        let contents: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();

        match self.backend.rerank(query, &contents).await {
            Ok(mut scores) => {
                scores.sort_by(|a, b| {
                    b.relevance_score
                        .partial_cmp(&a.relevance_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });

                let mut ranked = Vec::with_capacity(scores.len());
                for score in scores {
                    match documents.get(score.index) {
                        Some(doc) => {
                            ranked.push(RankedDocument::scored(doc.clone(), score.relevance_score))
                        },
                        None => tracing::warn!(
                            index = score.index,
                            candidates = documents.len(),
                            "Rerank result references unknown candidate, skipping"
                        ),
                    }
                }
                ranked
            },
            Err(e) => {
                tracing::warn!(error = %e, "Reranking failed, returning candidates unordered");
                documents.into_iter().map(RankedDocument::unranked).collect()
            },
        }
    }
}
