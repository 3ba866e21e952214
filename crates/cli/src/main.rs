//! Command-line interface
//!
//! Wires the retrieval engine to its external services: list registered
//! knowledge bases, build a bundle from prepared document records, and
//! run retrieval queries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rag_engine_config::Settings;
use rag_engine_core::{Document, RankedDocument};
use rag_engine_llm::{LlmConfig, OpenAiBackend};
use rag_engine_retrieval::{
    DualStageRetriever, EmbeddingConfig, HttpEmbedder, HttpReranker, KnowledgeBaseBuilder,
    KnowledgeBaseStore, QueryRewriter, RerankConfig, Reranker, RetrieveOptions, RetrieverConfig,
};

#[derive(Parser)]
#[command(name = "rag-engine", about = "Dual-stage retrieval over local knowledge bases")]
struct Cli {
    /// Path to a settings file (TOML/YAML/JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered knowledge bases
    List,

    /// Build and persist a knowledge base from a JSON documents file
    Build {
        /// Knowledge base name
        #[arg(long)]
        name: String,

        /// JSON file holding an array of {content, summary, tags} records
        #[arg(long)]
        input: PathBuf,
    },

    /// Retrieve documents for a query
    Query {
        /// Knowledge base name
        #[arg(long)]
        kb: String,

        /// The query text
        query: String,

        /// Results kept per sub-query
        #[arg(long)]
        top_k: Option<usize>,

        /// Score fraction threshold for sub-query results
        #[arg(long)]
        top_p: Option<f32>,

        /// Results kept for the key query
        #[arg(long)]
        key_top_k: Option<usize>,

        /// Score fraction threshold for tag results
        #[arg(long)]
        key_top_p: Option<f32>,

        /// Maximum documents returned
        #[arg(long)]
        final_top_k: Option<usize>,

        /// Skip reranking
        #[arg(long)]
        no_rerank: bool,

        /// Single-stage retrieval on the raw query (no rewrite, no tags)
        #[arg(long)]
        naive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let store = KnowledgeBaseStore::new(&settings.knowledge_base.root);

    match cli.command {
        Command::List => {
            let names = store.list_available()?;
            if names.is_empty() {
                println!("No knowledge bases registered.");
            } else {
                for name in names {
                    println!("{name}");
                }
            }
        },

        Command::Build { name, input } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let documents: Vec<Document> =
                serde_json::from_str(&raw).context("Invalid documents file")?;

            let embedder = embedder_from(&settings)?;
            let kb = KnowledgeBaseBuilder::new(name.as_str())
                .with_documents(documents)
                .build(&embedder)
                .await?;
            store.save(&kb)?;

            println!(
                "Built knowledge base '{name}': {} documents, {} tags",
                kb.documents.len(),
                kb.all_tags.len()
            );
        },

        Command::Query {
            kb,
            query,
            top_k,
            top_p,
            key_top_k,
            key_top_p,
            final_top_k,
            no_rerank,
            naive,
        } => {
            let kb = store.load(&kb)?;

            let mut opts = RetrieveOptions::from(&settings.retrieval);
            if let Some(v) = top_k {
                opts.top_k = v;
            }
            if let Some(v) = top_p {
                opts.top_p = v;
            }
            if let Some(v) = key_top_k {
                opts.key_top_k = v;
            }
            if let Some(v) = key_top_p {
                opts.key_top_p = v;
            }
            if let Some(v) = final_top_k {
                opts.final_top_k = v;
            }
            if no_rerank {
                opts.do_rerank = false;
            }

            let retriever = retriever_from(&settings)?;
            let results = if naive {
                retriever.retrieve_naive(&kb, &query, &opts).await
            } else {
                retriever.retrieve(&kb, &query, &opts).await
            };

            print_results(&results);
        },
    }

    Ok(())
}

fn embedder_from(settings: &Settings) -> Result<HttpEmbedder> {
    let embedder = HttpEmbedder::new(EmbeddingConfig {
        endpoint: settings.embedding.endpoint.clone(),
        model: settings.embedding.model.clone(),
        dimension: settings.embedding.dimension,
        batch_size: settings.embedding.batch_size,
        timeout: Duration::from_millis(settings.embedding.timeout_ms),
    })?;
    Ok(embedder)
}

fn retriever_from(settings: &Settings) -> Result<DualStageRetriever> {
    let llm = OpenAiBackend::new(LlmConfig {
        model: settings.llm.model.clone(),
        endpoint: settings.llm.endpoint.clone(),
        api_key: None,
        max_tokens: settings.llm.max_tokens,
        temperature: settings.llm.temperature,
        timeout: Duration::from_millis(settings.llm.timeout_ms),
    })?;

    let reranker = HttpReranker::new(RerankConfig {
        endpoint: settings.rerank.endpoint.clone(),
        model: settings.rerank.model.clone(),
        timeout: Duration::from_millis(settings.rerank.timeout_ms),
    })?;

    let retriever = DualStageRetriever::new(
        QueryRewriter::new(Arc::new(llm)),
        Arc::new(embedder_from(settings)?),
        Reranker::new(Arc::new(reranker)),
    )
    .with_config(RetrieverConfig {
        max_concurrent_sub_queries: settings.retrieval.max_concurrent_sub_queries,
    });

    Ok(retriever)
}

fn print_results(results: &[RankedDocument]) {
    if results.is_empty() {
        println!("No documents retrieved.");
        return;
    }

    for (i, result) in results.iter().enumerate() {
        match result.relevance_score {
            Some(score) => println!("#{} (score {:.4})", i + 1, score),
            None => println!("#{}", i + 1),
        }
        println!("  summary: {}", result.document.summary);
        if !result.document.tags.is_empty() {
            let tags: Vec<&str> = result.document.tags.iter().map(String::as_str).collect();
            println!("  tags: {}", tags.join(", "));
        }
        println!("  {}", result.document.content);
        println!();
    }
}
