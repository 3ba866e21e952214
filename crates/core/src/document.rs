//! Knowledge-base document model

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single knowledge-base document.
///
/// Documents are immutable once ingested and owned by the knowledge base
/// that loaded them. Within a knowledge base a document is identified by
/// its position in the document list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Full document content
    pub content: String,
    /// Short summary used for summary-level retrieval
    pub summary: String,
    /// Tags annotating the document
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Document {
    pub fn new(
        content: impl Into<String>,
        summary: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            content: content.into(),
            summary: summary.into(),
            tags: tags.into_iter().collect(),
        }
    }
}

/// A retrieved document with an optional relevance score.
///
/// The score is set by the reranker; results returned without reranking
/// (or after a degraded rerank call) carry no score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedDocument {
    pub document: Document,
    pub relevance_score: Option<f32>,
}

impl RankedDocument {
    /// Wrap a document that was not scored by the reranker.
    pub fn unranked(document: Document) -> Self {
        Self {
            document,
            relevance_score: None,
        }
    }

    /// Wrap a document with its rerank score.
    pub fn scored(document: Document, relevance_score: f32) -> Self {
        Self {
            document,
            relevance_score: Some(relevance_score),
        }
    }
}

/// Result of decomposing a raw user query.
///
/// Produced per incoming query and consumed immediately by the retriever;
/// `sub_queries` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewrittenQuery {
    /// The verbatim input query
    pub original_query: String,
    /// Canonical restatement used against the tag index
    pub key_query: String,
    /// Decomposed fragments used against the summary index
    pub sub_queries: Vec<String>,
}

impl RewrittenQuery {
    /// Degraded rewrite: the raw query stands in for every field.
    pub fn passthrough(query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            key_query: query.to_string(),
            sub_queries: vec![query.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_rewrite() {
        let rewritten = RewrittenQuery::passthrough("how does it work?");
        assert_eq!(rewritten.original_query, "how does it work?");
        assert_eq!(rewritten.key_query, "how does it work?");
        assert_eq!(rewritten.sub_queries, vec!["how does it work?"]);
    }

    #[test]
    fn test_document_serialization() {
        let doc = Document::new("content", "summary", vec!["a".to_string(), "b".to_string()]);
        let json = serde_json::to_string(&doc).unwrap();
        let parsed: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, doc);
    }
}
