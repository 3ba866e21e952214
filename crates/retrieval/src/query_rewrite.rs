//! Query rewriting
//!
//! Decomposes a raw query into `{original_query, key_query, sub_queries}`
//! via the text-generation service. Model output is parsed by an ordered
//! cascade of strategies; when the call or every strategy fails, the raw
//! query stands in for every field so retrieval always proceeds with at
//! least one sub-query.

use std::sync::Arc;

use serde::Deserialize;

use rag_engine_core::RewrittenQuery;
use rag_engine_llm::{prompt, LlmBackend};

/// Outcome of one parse attempt over a model response.
#[derive(Debug)]
pub enum ParsedRewrite {
    Ok(RewrittenQuery),
    Failed,
}

/// Fields a rewrite response may carry. All optional: the cascade accepts
/// any object that yields at least one usable field.
#[derive(Debug, Deserialize)]
struct RewriteFields {
    #[serde(default)]
    key_query: Option<String>,
    #[serde(default)]
    sub_queries: Option<Vec<String>>,
}

impl RewriteFields {
    fn has_content(&self) -> bool {
        let key = self
            .key_query
            .as_ref()
            .is_some_and(|s| !s.trim().is_empty());
        let subs = self
            .sub_queries
            .as_ref()
            .is_some_and(|v| v.iter().any(|s| !s.trim().is_empty()));
        key || subs
    }

    fn into_rewritten(self, query: &str) -> RewrittenQuery {
        let key_query = self
            .key_query
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| query.to_string());

        let mut sub_queries: Vec<String> = self
            .sub_queries
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if sub_queries.is_empty() {
            sub_queries.push(query.to_string());
        }

        RewrittenQuery {
            original_query: query.to_string(),
            key_query,
            sub_queries,
        }
    }
}

type ParseStrategy = fn(&str) -> Option<RewriteFields>;

/// Ordered parse cascade: whole response as JSON, then the contents of a
/// fenced code block, then the first-`{`-to-last-`}` slice.
const STRATEGIES: &[ParseStrategy] = &[parse_direct, parse_fenced, parse_embedded];

fn parse_fields(text: &str) -> Option<RewriteFields> {
    let fields: RewriteFields = serde_json::from_str(text.trim()).ok()?;
    fields.has_content().then_some(fields)
}

fn parse_direct(raw: &str) -> Option<RewriteFields> {
    parse_fields(raw)
}

fn parse_fenced(raw: &str) -> Option<RewriteFields> {
    let start = raw.find("```")?;
    let inner = &raw[start + 3..];
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let end = inner.find("```")?;
    parse_fields(&inner[..end])
}

fn parse_embedded(raw: &str) -> Option<RewriteFields> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_fields(&raw[start..=end])
}

/// Run the cascade over a raw model response.
pub fn parse_rewrite(raw: &str, query: &str) -> ParsedRewrite {
    for strategy in STRATEGIES {
        if let Some(fields) = strategy(raw) {
            return ParsedRewrite::Ok(fields.into_rewritten(query));
        }
    }
    ParsedRewrite::Failed
}

/// Rewrites raw queries through the text-generation service.
pub struct QueryRewriter {
    llm: Arc<dyn LlmBackend>,
}

impl QueryRewriter {
    pub fn new(llm: Arc<dyn LlmBackend>) -> Self {
        Self { llm }
    }

    /// Rewrite a query. Infallible: transport failures and unparseable
    /// responses degrade to the raw query standing in for every field.
    pub async fn rewrite(&self, query: &str) -> RewrittenQuery {
        let messages = prompt::rewrite_messages(query);

        match self.llm.generate(&messages).await {
            Ok(result) => match parse_rewrite(&result.text, query) {
                ParsedRewrite::Ok(rewritten) => {
                    tracing::debug!(
                        key_query = %rewritten.key_query,
                        sub_queries = rewritten.sub_queries.len(),
                        "Query rewritten"
                    );
                    rewritten
                },
                ParsedRewrite::Failed => {
                    tracing::warn!(
                        query,
                        response_len = result.text.len(),
                        "Rewrite response unparseable, using raw query"
                    );
                    RewrittenQuery::passthrough(query)
                },
            },
            Err(e) => {
                tracing::warn!(query, error = %e, "Rewrite call failed, using raw query");
                RewrittenQuery::passthrough(query)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_engine_llm::ScriptedBackend;

    #[tokio::test]
    async fn test_parses_direct_json() {
        let backend = ScriptedBackend::with_responses(vec![
            r#"{"original_query": "q", "key_query": "vector indices", "sub_queries": ["what is a flat index", "how is cosine computed"]}"#
                .to_string(),
        ]);
        let rewriter = QueryRewriter::new(Arc::new(backend));

        let rewritten = rewriter.rewrite("how do vector indices work").await;
        assert_eq!(rewritten.original_query, "how do vector indices work");
        assert_eq!(rewritten.key_query, "vector indices");
        assert_eq!(rewritten.sub_queries.len(), 2);
    }

    #[tokio::test]
    async fn test_parses_fenced_json() {
        let backend = ScriptedBackend::with_responses(vec![
            "Here is the decomposition:\n```json\n{\"key_query\": \"k\", \"sub_queries\": [\"a\"]}\n```\nDone."
                .to_string(),
        ]);
        let rewriter = QueryRewriter::new(Arc::new(backend));

        let rewritten = rewriter.rewrite("q").await;
        assert_eq!(rewritten.key_query, "k");
        assert_eq!(rewritten.sub_queries, vec!["a"]);
    }

    #[tokio::test]
    async fn test_parses_embedded_json() {
        let backend = ScriptedBackend::with_responses(vec![
            "Sure! The answer is {\"key_query\": \"k\", \"sub_queries\": [\"a\", \"b\"]} hope that helps"
                .to_string(),
        ]);
        let rewriter = QueryRewriter::new(Arc::new(backend));

        let rewritten = rewriter.rewrite("q").await;
        assert_eq!(rewritten.sub_queries, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unparseable_response_falls_back() {
        let backend =
            ScriptedBackend::with_responses(vec!["I could not decompose that.".to_string()]);
        let rewriter = QueryRewriter::new(Arc::new(backend));

        let rewritten = rewriter.rewrite("X").await;
        assert_eq!(rewritten, RewrittenQuery::passthrough("X"));
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back() {
        let rewriter = QueryRewriter::new(Arc::new(ScriptedBackend::failing()));

        let rewritten = rewriter.rewrite("X").await;
        assert_eq!(rewritten.original_query, "X");
        assert_eq!(rewritten.key_query, "X");
        assert_eq!(rewritten.sub_queries, vec!["X"]);
    }

    #[tokio::test]
    async fn test_missing_key_query_defaults_to_raw() {
        let backend = ScriptedBackend::with_responses(vec![
            r#"{"sub_queries": ["only subs here"]}"#.to_string(),
        ]);
        let rewriter = QueryRewriter::new(Arc::new(backend));

        let rewritten = rewriter.rewrite("raw").await;
        assert_eq!(rewritten.key_query, "raw");
        assert_eq!(rewritten.sub_queries, vec!["only subs here"]);
    }

    #[tokio::test]
    async fn test_empty_sub_queries_default_to_raw() {
        let backend = ScriptedBackend::with_responses(vec![
            r#"{"key_query": "k", "sub_queries": ["", "  "]}"#.to_string(),
        ]);
        let rewriter = QueryRewriter::new(Arc::new(backend));

        let rewritten = rewriter.rewrite("raw").await;
        assert_eq!(rewritten.key_query, "k");
        assert_eq!(rewritten.sub_queries, vec!["raw"]);
    }

    #[test]
    fn test_cascade_prefers_direct_parse() {
        let raw = r#"{"key_query": "direct", "sub_queries": ["s"]}"#;
        match parse_rewrite(raw, "q") {
            ParsedRewrite::Ok(r) => assert_eq!(r.key_query, "direct"),
            ParsedRewrite::Failed => panic!("expected parse to succeed"),
        }
    }

    #[test]
    fn test_empty_object_fails() {
        assert!(matches!(parse_rewrite("{}", "q"), ParsedRewrite::Failed));
    }
}
