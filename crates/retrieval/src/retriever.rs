//! Dual-stage retriever
//!
//! Orchestrates one retrieval call: query rewrite, concurrent sub-query
//! search against the summary index, key-query search against the tag
//! index with tag-to-document expansion, set-union merge, and optional
//! reranking.
//!
//! Sub-query tasks share nothing mutable while running; each returns its
//! own candidate set and the union happens after every task completes, so
//! completion order never changes the result.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use rag_engine_config::constants::retrieval as defaults;
use rag_engine_core::{Document, RankedDocument};

use crate::embeddings::EmbeddingProvider;
use crate::kb_store::KnowledgeBase;
use crate::query_rewrite::QueryRewriter;
use crate::reranker::Reranker;

/// Per-call retrieval parameters
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Results kept per sub-query against the summary index
    pub top_k: usize,
    /// Score fraction of the best summary hit a result must reach
    pub top_p: f32,
    /// Results kept for the key query against the tag index
    pub key_top_k: usize,
    /// Score fraction of the best tag hit a result must reach
    pub key_top_p: f32,
    /// Maximum documents returned
    pub final_top_k: usize,
    /// Rerank the merged candidates before truncation
    pub do_rerank: bool,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            top_k: defaults::SUB_QUERY_TOP_K,
            top_p: defaults::SUB_QUERY_TOP_P,
            key_top_k: defaults::KEY_QUERY_TOP_K,
            key_top_p: defaults::KEY_QUERY_TOP_P,
            final_top_k: defaults::FINAL_TOP_K,
            do_rerank: true,
        }
    }
}

impl From<&rag_engine_config::RetrievalSettings> for RetrieveOptions {
    fn from(settings: &rag_engine_config::RetrievalSettings) -> Self {
        Self {
            top_k: settings.sub_query_top_k,
            top_p: settings.sub_query_top_p,
            key_top_k: settings.key_query_top_k,
            key_top_p: settings.key_query_top_p,
            final_top_k: settings.final_top_k,
            do_rerank: settings.do_rerank,
        }
    }
}

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Bound on concurrent sub-query search tasks
    pub max_concurrent_sub_queries: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sub_queries: defaults::MAX_CONCURRENT_SUB_QUERIES,
        }
    }
}

/// Dual-stage retriever
pub struct DualStageRetriever {
    rewriter: QueryRewriter,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Reranker,
    config: RetrieverConfig,
}

impl DualStageRetriever {
    pub fn new(
        rewriter: QueryRewriter,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Reranker,
    ) -> Self {
        Self {
            rewriter,
            embedder,
            reranker,
            config: RetrieverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrieverConfig) -> Self {
        self.config = config;
        self
    }

    /// Retrieve documents for `query` from a loaded knowledge base.
    ///
    /// Never fails on upstream outages: every degraded stage contributes
    /// an empty candidate set and the worst case is an empty result.
    pub async fn retrieve(
        &self,
        kb: &KnowledgeBase,
        query: &str,
        opts: &RetrieveOptions,
    ) -> Vec<RankedDocument> {
        let rewritten = self.rewriter.rewrite(query).await;

        let limit = self.config.max_concurrent_sub_queries.max(1);
        let stage_a_sets: Vec<HashSet<usize>> = stream::iter(
            rewritten
                .sub_queries
                .iter()
                .map(|sub_query| self.summary_stage(kb, sub_query, opts)),
        )
        .buffer_unordered(limit)
        .collect()
        .await;

        let mut candidates: HashSet<usize> = HashSet::new();
        for set in stage_a_sets {
            candidates.extend(set);
        }
        tracing::debug!(
            sub_queries = rewritten.sub_queries.len(),
            candidates = candidates.len(),
            "Summary stage complete"
        );

        let tag_candidates = self.tag_stage(kb, &rewritten.key_query, opts).await;
        tracing::debug!(candidates = tag_candidates.len(), "Tag stage complete");
        candidates.extend(tag_candidates);

        let documents = materialize(kb, candidates);
        if documents.is_empty() {
            return Vec::new();
        }

        self.finish(query, documents, opts).await
    }

    /// Single-stage retrieval: embed the raw query and search only the
    /// summary index, skipping rewrite and the tag stage. Summary scores
    /// are kept as relevance scores when reranking is off.
    pub async fn retrieve_naive(
        &self,
        kb: &KnowledgeBase,
        query: &str,
        opts: &RetrieveOptions,
    ) -> Vec<RankedDocument> {
        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(query, error = %e, "Query embedding failed");
                return Vec::new();
            },
        };

        let hits = kb.summary_index.search(&embedding, opts.top_k * 2);
        let mut scored: Vec<(Document, f32)> = Vec::new();
        if let Some(&(top_score, _)) = hits.first() {
            if top_score > 0.0 {
                let threshold = top_score * opts.top_p;
                for (score, idx) in hits {
                    if idx < 0 || score < threshold {
                        continue;
                    }
                    if let Some(doc) = kb.documents.get(idx as usize) {
                        scored.push((doc.clone(), score));
                    }
                }
            }
        }
        scored.truncate(opts.top_k);

        if scored.is_empty() {
            return Vec::new();
        }

        if opts.do_rerank {
            let documents = scored.into_iter().map(|(doc, _)| doc).collect();
            let mut ranked = self.reranker.rerank(query, documents).await;
            ranked.truncate(opts.final_top_k);
            ranked
        } else {
            scored
                .into_iter()
                .take(opts.final_top_k)
                .map(|(doc, score)| RankedDocument::scored(doc, score))
                .collect()
        }
    }

    /// Stage A for one sub-query: embed, search the summary index for
    /// `2×top_k` candidates, keep those within `top_p` of the best score,
    /// truncate to `top_k`. A failed embedding contributes nothing.
    async fn summary_stage(
        &self,
        kb: &KnowledgeBase,
        sub_query: &str,
        opts: &RetrieveOptions,
    ) -> HashSet<usize> {
        let embedding = match self.embedder.embed(sub_query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(sub_query, error = %e, "Sub-query embedding failed, skipping");
                return HashSet::new();
            },
        };

        let hits = kb.summary_index.search(&embedding, opts.top_k * 2);
        let mut kept = Vec::new();
        if let Some(&(top_score, _)) = hits.first() {
            if top_score > 0.0 {
                let threshold = top_score * opts.top_p;
                for (score, idx) in hits {
                    if idx < 0 || score < threshold {
                        continue;
                    }
                    let idx = idx as usize;
                    if idx < kb.documents.len() {
                        kept.push(idx);
                    }
                }
            }
        }
        kept.truncate(opts.top_k);
        kept.into_iter().collect()
    }

    /// Stage B: embed the key query, search the tag index, keep tags
    /// within `key_top_p` of the best score and expand them into document
    /// indices through the adjacency map.
    async fn tag_stage(
        &self,
        kb: &KnowledgeBase,
        key_query: &str,
        opts: &RetrieveOptions,
    ) -> HashSet<usize> {
        let mut documents = HashSet::new();

        let k = kb.all_tags.len().min(opts.key_top_k * 3);
        if k == 0 {
            return documents;
        }

        let embedding = match self.embedder.embed(key_query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(key_query, error = %e, "Key-query embedding failed, skipping");
                return documents;
            },
        };

        let hits = kb.tag_index.search(&embedding, k);
        if let Some(&(top_score, _)) = hits.first() {
            if top_score > 0.0 {
                let threshold = top_score * opts.key_top_p;
                for (score, idx) in hits {
                    if idx < 0 || score < threshold {
                        continue;
                    }
                    let idx = idx as usize;
                    if idx >= kb.all_tags.len() {
                        continue;
                    }
                    if let Some(doc_indices) = kb.tag_to_doc_map.get(&idx) {
                        documents.extend(doc_indices.iter().copied());
                    }
                }
            }
        }

        documents
    }

    /// Rerank-or-truncate tail shared by both retrieval paths.
    async fn finish(
        &self,
        query: &str,
        documents: Vec<Document>,
        opts: &RetrieveOptions,
    ) -> Vec<RankedDocument> {
        if opts.do_rerank {
            let mut ranked = self.reranker.rerank(query, documents).await;
            ranked.truncate(opts.final_top_k);
            ranked
        } else {
            documents
                .into_iter()
                .take(opts.final_top_k)
                .map(RankedDocument::unranked)
                .collect()
        }
    }
}

/// Materialize candidate indices into documents, ascending by index.
/// Out-of-bounds indices are dropped rather than panicking.
fn materialize(kb: &KnowledgeBase, candidates: HashSet<usize>) -> Vec<Document> {
    let mut indices: Vec<usize> = candidates.into_iter().collect();
    indices.sort_unstable();
    indices
        .into_iter()
        .filter_map(|idx| kb.documents.get(idx).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use async_trait::async_trait;

    use rag_engine_llm::ScriptedBackend;

    use crate::embeddings::HashEmbedder;
    use crate::kb_store::KnowledgeBaseBuilder;
    use crate::reranker::{RerankBackend, RerankScore};
    use crate::RetrievalError;

    const DIM: usize = 8;

    /// Embedder with a fixed text-to-vector table. Unknown texts fail the
    /// single-embed path (degrade testing) and embed to zero in batches.
    struct KeyedEmbedder {
        map: HashMap<String, Vec<f32>>,
    }

    impl KeyedEmbedder {
        fn new(entries: &[(&str, usize)]) -> Self {
            let map = entries
                .iter()
                .map(|(text, position)| (text.to_string(), one_hot(*position)))
                .collect();
            Self { map }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeyedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            self.map
                .get(text)
                .cloned()
                .ok_or_else(|| RetrievalError::Upstream(format!("no embedding for '{text}'")))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            Ok(texts
                .iter()
                .map(|t| self.map.get(t).cloned().unwrap_or_else(|| vec![0.0; DIM]))
                .collect())
        }

        fn dim(&self) -> usize {
            DIM
        }
    }

    struct FailingRerank;

    #[async_trait]
    impl RerankBackend for FailingRerank {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[String],
        ) -> Result<Vec<RerankScore>, RetrievalError> {
            Err(RetrievalError::Upstream("connection refused".to_string()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn one_hot(position: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[position % DIM] = 1.0;
        v
    }

    fn doc(i: usize, tags: &[&str]) -> Document {
        Document::new(
            format!("doc-{i}"),
            format!("sum-{i}"),
            tags.iter().map(|t| t.to_string()),
        )
    }

    /// Five documents whose summaries embed to one-hot vectors 0..4;
    /// documents 3 and 4 share the tag "shared" which embeds to axis 5.
    async fn test_kb(embedder: &KeyedEmbedder) -> KnowledgeBase {
        KnowledgeBaseBuilder::new("test")
            .with_documents(vec![
                doc(0, &[]),
                doc(1, &[]),
                doc(2, &[]),
                doc(3, &["shared"]),
                doc(4, &["shared"]),
            ])
            .build(embedder)
            .await
            .unwrap()
    }

    fn base_entries() -> Vec<(&'static str, usize)> {
        vec![
            ("sum-0", 0),
            ("sum-1", 1),
            ("sum-2", 2),
            ("sum-3", 3),
            ("sum-4", 4),
            ("shared", 5),
        ]
    }

    fn retriever(
        llm: ScriptedBackend,
        embedder: Arc<KeyedEmbedder>,
    ) -> DualStageRetriever {
        DualStageRetriever::new(
            QueryRewriter::new(Arc::new(llm)),
            embedder,
            Reranker::new(Arc::new(FailingRerank)),
        )
    }

    fn contents(results: &[RankedDocument]) -> Vec<String> {
        results.iter().map(|r| r.document.content.clone()).collect()
    }

    #[tokio::test]
    async fn test_merge_is_set_union_of_both_stages() {
        let mut entries = base_entries();
        entries.extend([("q1", 1), ("q2", 2), ("q3", 3), ("kq", 5)]);
        let embedder = Arc::new(KeyedEmbedder::new(&entries));
        let kb = test_kb(&embedder).await;

        // Stage A hits {1, 2, 3} via the sub-queries, Stage B expands the
        // "shared" tag into {3, 4}
        let llm = ScriptedBackend::with_responses(vec![
            r#"{"key_query": "kq", "sub_queries": ["q1", "q2", "q3"]}"#.to_string(),
        ]);
        let retriever = retriever(llm, embedder);

        let opts = RetrieveOptions {
            top_k: 1,
            top_p: 1.0,
            key_top_k: 2,
            key_top_p: 1.0,
            final_top_k: 10,
            do_rerank: false,
        };
        let results = retriever.retrieve(&kb, "anything", &opts).await;

        assert_eq!(contents(&results), vec!["doc-1", "doc-2", "doc-3", "doc-4"]);
        assert!(results.iter().all(|r| r.relevance_score.is_none()));
    }

    #[tokio::test]
    async fn test_end_to_end_with_failing_rewrite() {
        let mut entries = base_entries();
        entries.push(("find doc two", 2));
        let embedder = Arc::new(KeyedEmbedder::new(&entries));
        let kb = test_kb(&embedder).await;

        // Rewrite service down: the raw query is the only sub-query
        let retriever = retriever(ScriptedBackend::failing(), embedder);

        let opts = RetrieveOptions {
            top_k: 3,
            top_p: 0.0,
            key_top_k: 5,
            key_top_p: 0.8,
            final_top_k: 15,
            do_rerank: false,
        };
        let results = retriever.retrieve(&kb, "find doc two", &opts).await;

        assert!(!results.is_empty());
        assert!(contents(&results).contains(&"doc-2".to_string()));
    }

    #[tokio::test]
    async fn test_retrieve_is_idempotent() {
        let mut entries = base_entries();
        entries.extend([("q1", 1), ("q2", 2), ("kq", 5)]);
        let embedder = Arc::new(KeyedEmbedder::new(&entries));
        let kb = test_kb(&embedder).await;

        let llm = ScriptedBackend::with_responses(vec![
            r#"{"key_query": "kq", "sub_queries": ["q1", "q2"]}"#.to_string(),
        ]);
        let retriever = retriever(llm, embedder);

        let opts = RetrieveOptions {
            top_k: 2,
            top_p: 0.5,
            key_top_k: 2,
            key_top_p: 0.5,
            final_top_k: 10,
            do_rerank: false,
        };
        let first = retriever.retrieve(&kb, "anything", &opts).await;
        let second = retriever.retrieve(&kb, "anything", &opts).await;

        assert_eq!(contents(&first), contents(&second));
    }

    #[tokio::test]
    async fn test_raising_top_p_never_grows_stage_a() {
        let entries: Vec<(&str, usize)> = base_entries()
            .into_iter()
            .chain([("spread", 0)])
            .collect();
        let embedder = Arc::new(KeyedEmbedder::new(&entries));

        // Summaries at varying angles to the "spread" query vector
        let kb = KnowledgeBaseBuilder::new("angles")
            .with_documents(vec![doc(0, &[]), doc(1, &[]), doc(2, &[]), doc(3, &[])])
            .build(&KeyedEmbedder {
                map: HashMap::from([
                    ("sum-0".to_string(), vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
                    ("sum-1".to_string(), vec![1.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
                    ("sum-2".to_string(), vec![1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
                    ("sum-3".to_string(), vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
                ]),
            })
            .await
            .unwrap();

        let retriever = retriever(ScriptedBackend::failing(), embedder);

        let mut previous = usize::MAX;
        for top_p in [0.0, 0.5, 0.9, 1.0] {
            let opts = RetrieveOptions {
                top_k: 4,
                top_p,
                key_top_k: 5,
                key_top_p: 0.8,
                final_top_k: 15,
                do_rerank: false,
            };
            let count = retriever.retrieve(&kb, "spread", &opts).await.len();
            assert!(count <= previous, "top_p {top_p} grew the candidate count");
            previous = count;
        }
    }

    #[tokio::test]
    async fn test_failed_sub_query_embedding_degrades() {
        let mut entries = base_entries();
        entries.extend([("q1", 1), ("kq", 5)]);
        let embedder = Arc::new(KeyedEmbedder::new(&entries));
        let kb = test_kb(&embedder).await;

        // "q-unknown" has no embedding and must contribute nothing
        let llm = ScriptedBackend::with_responses(vec![
            r#"{"key_query": "kq", "sub_queries": ["q1", "q-unknown"]}"#.to_string(),
        ]);
        let retriever = retriever(llm, embedder);

        let opts = RetrieveOptions {
            top_k: 1,
            top_p: 1.0,
            key_top_k: 2,
            key_top_p: 1.0,
            final_top_k: 10,
            do_rerank: false,
        };
        let results = retriever.retrieve(&kb, "anything", &opts).await;

        assert_eq!(contents(&results), vec!["doc-1", "doc-3", "doc-4"]);
    }

    #[tokio::test]
    async fn test_empty_knowledge_base_yields_empty() {
        let embedder = Arc::new(KeyedEmbedder::new(&[("query", 0)]));
        let kb = KnowledgeBaseBuilder::new("empty")
            .build(&HashEmbedder::new(DIM))
            .await
            .unwrap();

        let retriever = retriever(ScriptedBackend::failing(), embedder);
        let results = retriever
            .retrieve(&kb, "query", &RetrieveOptions::default())
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_naive_retrieval_keeps_summary_scores() {
        let mut entries = base_entries();
        entries.push(("find doc two", 2));
        let embedder = Arc::new(KeyedEmbedder::new(&entries));
        let kb = test_kb(&embedder).await;

        let retriever = retriever(ScriptedBackend::failing(), embedder);

        let opts = RetrieveOptions {
            top_k: 3,
            top_p: 0.9,
            key_top_k: 5,
            key_top_p: 0.8,
            final_top_k: 15,
            do_rerank: false,
        };
        let results = retriever.retrieve_naive(&kb, "find doc two", &opts).await;

        assert_eq!(contents(&results), vec!["doc-2"]);
        assert!(results[0].relevance_score.unwrap() > 0.99);
    }

    #[tokio::test]
    async fn test_final_top_k_truncates() {
        let mut entries = base_entries();
        entries.push(("q-all", 0));
        let embedder = Arc::new(KeyedEmbedder::new(&entries));
        let kb = test_kb(&embedder).await;

        let llm = ScriptedBackend::with_responses(vec![
            r#"{"key_query": "q-all", "sub_queries": ["q-all"]}"#.to_string(),
        ]);
        let retriever = retriever(llm, embedder);

        let opts = RetrieveOptions {
            top_k: 5,
            top_p: 0.0,
            key_top_k: 5,
            key_top_p: 0.0,
            final_top_k: 2,
            do_rerank: false,
        };
        let results = retriever.retrieve(&kb, "q-all", &opts).await;
        assert_eq!(results.len(), 2);
    }
}
