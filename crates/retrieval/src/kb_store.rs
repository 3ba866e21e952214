//! Knowledge-base bundles
//!
//! A bundle is one directory per knowledge base holding the document
//! records, the tag vocabulary with its tag-to-document adjacency, and the
//! two serialized vector indices. A registry file at the storage root maps
//! knowledge-base names to their bundle directories.
//!
//! Bundles are built offline, loaded read-only per retrieval session, and
//! never mutated in-process. A loaded `KnowledgeBase` is safe to share
//! across concurrent retrieval calls.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rag_engine_core::Document;

use crate::embeddings::EmbeddingProvider;
use crate::vector_index::VectorIndex;
use crate::RetrievalError;

const METADATA_FILE: &str = "metadata.json";
const SUMMARY_INDEX_FILE: &str = "summary_index.json";
const TAG_INDEX_FILE: &str = "tag_index.json";
const REGISTRY_FILE: &str = "registry.json";

/// A loaded knowledge base.
///
/// Invariants, enforced at load time:
/// - `summary_index` holds exactly one vector per document, in document
///   order
/// - `tag_index` holds exactly one vector per tag, in tag order
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    pub name: String,
    pub documents: Vec<Document>,
    pub all_tags: Vec<String>,
    /// Tag index -> indices of the documents carrying that tag
    pub tag_to_doc_map: HashMap<usize, BTreeSet<usize>>,
    pub summary_index: VectorIndex,
    pub tag_index: VectorIndex,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BundleMetadata {
    name: String,
    document_count: usize,
    tag_count: usize,
    created_at: DateTime<Utc>,
    documents: Vec<Document>,
    all_tags: Vec<String>,
    tag_to_doc_map: HashMap<usize, BTreeSet<usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryEntry {
    path: String,
    document_count: usize,
}

/// Store for persisted knowledge-base bundles under one root directory.
pub struct KnowledgeBaseStore {
    root: PathBuf,
}

impl KnowledgeBaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load a bundle by name.
    ///
    /// `NotFound` when no bundle directory exists under that name;
    /// `Corruption` when any bundle file is missing or unparseable, or
    /// when the stored counts and index sizes disagree.
    pub fn load(&self, name: &str) -> Result<KnowledgeBase, RetrievalError> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(RetrievalError::NotFound(name.to_string()));
        }

        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.is_file() {
            return Err(RetrievalError::Corruption(format!(
                "Bundle '{name}' is missing {METADATA_FILE}"
            )));
        }
        let raw = std::fs::read_to_string(&metadata_path)
            .map_err(|e| RetrievalError::Io(format!("Failed to read {METADATA_FILE}: {e}")))?;
        let metadata: BundleMetadata = serde_json::from_str(&raw).map_err(|e| {
            RetrievalError::Corruption(format!("Bundle '{name}': invalid {METADATA_FILE}: {e}"))
        })?;

        let summary_index = Self::load_index(name, &dir, SUMMARY_INDEX_FILE)?;
        let tag_index = Self::load_index(name, &dir, TAG_INDEX_FILE)?;

        if metadata.document_count != metadata.documents.len() {
            return Err(RetrievalError::Corruption(format!(
                "Bundle '{name}': metadata reports {} documents but stores {}",
                metadata.document_count,
                metadata.documents.len()
            )));
        }
        if metadata.tag_count != metadata.all_tags.len() {
            return Err(RetrievalError::Corruption(format!(
                "Bundle '{name}': metadata reports {} tags but stores {}",
                metadata.tag_count,
                metadata.all_tags.len()
            )));
        }
        if summary_index.len() != metadata.documents.len() {
            return Err(RetrievalError::Corruption(format!(
                "Bundle '{name}': {} documents but {} summary vectors",
                metadata.documents.len(),
                summary_index.len()
            )));
        }
        if tag_index.len() != metadata.all_tags.len() {
            return Err(RetrievalError::Corruption(format!(
                "Bundle '{name}': {} tags but {} tag vectors",
                metadata.all_tags.len(),
                tag_index.len()
            )));
        }

        tracing::info!(
            name,
            documents = metadata.documents.len(),
            tags = metadata.all_tags.len(),
            "Loaded knowledge base"
        );

        Ok(KnowledgeBase {
            name: metadata.name,
            documents: metadata.documents,
            all_tags: metadata.all_tags,
            tag_to_doc_map: metadata.tag_to_doc_map,
            summary_index,
            tag_index,
            created_at: metadata.created_at,
        })
    }

    fn load_index(name: &str, dir: &Path, file: &str) -> Result<VectorIndex, RetrievalError> {
        let path = dir.join(file);
        if !path.is_file() {
            return Err(RetrievalError::Corruption(format!(
                "Bundle '{name}' is missing {file}"
            )));
        }
        VectorIndex::load(&path)
    }

    /// Persist a bundle and register its name.
    pub fn save(&self, kb: &KnowledgeBase) -> Result<(), RetrievalError> {
        let dir = self.root.join(&kb.name);
        std::fs::create_dir_all(&dir)
            .map_err(|e| RetrievalError::Io(format!("Failed to create {}: {e}", dir.display())))?;

        let metadata = BundleMetadata {
            name: kb.name.clone(),
            document_count: kb.documents.len(),
            tag_count: kb.all_tags.len(),
            created_at: kb.created_at,
            documents: kb.documents.clone(),
            all_tags: kb.all_tags.clone(),
            tag_to_doc_map: kb.tag_to_doc_map.clone(),
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| RetrievalError::Io(format!("Failed to serialize metadata: {e}")))?;
        std::fs::write(dir.join(METADATA_FILE), json)
            .map_err(|e| RetrievalError::Io(format!("Failed to write {METADATA_FILE}: {e}")))?;

        kb.summary_index.save(&dir.join(SUMMARY_INDEX_FILE))?;
        kb.tag_index.save(&dir.join(TAG_INDEX_FILE))?;

        let mut registry = self.read_registry()?;
        registry.insert(
            kb.name.clone(),
            RegistryEntry {
                path: kb.name.clone(),
                document_count: kb.documents.len(),
            },
        );
        self.write_registry(&registry)?;

        tracing::info!(
            name = %kb.name,
            documents = kb.documents.len(),
            tags = kb.all_tags.len(),
            "Saved knowledge base"
        );

        Ok(())
    }

    /// Names of all registered knowledge bases. An absent registry means
    /// no knowledge bases, not an error.
    pub fn list_available(&self) -> Result<Vec<String>, RetrievalError> {
        Ok(self.read_registry()?.into_keys().collect())
    }

    fn read_registry(&self) -> Result<BTreeMap<String, RegistryEntry>, RetrievalError> {
        let path = self.root.join(REGISTRY_FILE);
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| RetrievalError::Io(format!("Failed to read {REGISTRY_FILE}: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| RetrievalError::Corruption(format!("Invalid {REGISTRY_FILE}: {e}")))
    }

    fn write_registry(
        &self,
        registry: &BTreeMap<String, RegistryEntry>,
    ) -> Result<(), RetrievalError> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            RetrievalError::Io(format!("Failed to create {}: {e}", self.root.display()))
        })?;
        let json = serde_json::to_string_pretty(registry)
            .map_err(|e| RetrievalError::Io(format!("Failed to serialize registry: {e}")))?;
        std::fs::write(self.root.join(REGISTRY_FILE), json)
            .map_err(|e| RetrievalError::Io(format!("Failed to write {REGISTRY_FILE}: {e}")))
    }
}

/// Assembles a `KnowledgeBase` from prepared document records.
///
/// Collects the tag vocabulary (deduplicated, in first-seen order) and the
/// tag-to-document adjacency, then embeds summaries and tags in batches.
pub struct KnowledgeBaseBuilder {
    name: String,
    documents: Vec<Document>,
}

impl KnowledgeBaseBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: Vec::new(),
        }
    }

    pub fn add_document(mut self, document: Document) -> Self {
        self.documents.push(document);
        self
    }

    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = documents;
        self
    }

    pub async fn build(
        self,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<KnowledgeBase, RetrievalError> {
        let mut all_tags: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut tag_to_doc_map: HashMap<usize, BTreeSet<usize>> = HashMap::new();

        for (doc_idx, doc) in self.documents.iter().enumerate() {
            for tag in &doc.tags {
                if tag.is_empty() {
                    continue;
                }
                let tag_idx = match positions.get(tag) {
                    Some(&idx) => idx,
                    None => {
                        let idx = all_tags.len();
                        all_tags.push(tag.clone());
                        positions.insert(tag.clone(), idx);
                        idx
                    },
                };
                tag_to_doc_map.entry(tag_idx).or_default().insert(doc_idx);
            }
        }

        let summaries: Vec<String> = self.documents.iter().map(|d| d.summary.clone()).collect();
        let summary_vectors = embedder.embed_batch(&summaries).await?;
        let tag_vectors = embedder.embed_batch(&all_tags).await?;

        let mut summary_index = VectorIndex::new(embedder.dim());
        summary_index.add(&summary_vectors)?;
        let mut tag_index = VectorIndex::new(embedder.dim());
        tag_index.add(&tag_vectors)?;

        tracing::info!(
            name = %self.name,
            documents = self.documents.len(),
            tags = all_tags.len(),
            "Built knowledge base"
        );

        Ok(KnowledgeBase {
            name: self.name,
            documents: self.documents,
            all_tags,
            tag_to_doc_map,
            summary_index,
            tag_index,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;

    fn sample_documents() -> Vec<Document> {
        vec![
            Document::new(
                "Flat indices scan every vector.",
                "How flat vector indices work",
                vec!["vector index".to_string(), "search".to_string()],
            ),
            Document::new(
                "Normalization makes inner product equal cosine.",
                "Why vectors are normalized",
                vec!["vector index".to_string(), "normalization".to_string()],
            ),
            Document::new(
                "Rerankers rescore a small candidate set.",
                "Cross-encoder reranking",
                vec!["reranking".to_string()],
            ),
        ]
    }

    async fn sample_kb(name: &str) -> KnowledgeBase {
        let embedder = HashEmbedder::new(32);
        KnowledgeBaseBuilder::new(name)
            .with_documents(sample_documents())
            .build(&embedder)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_builder_deduplicates_tags() {
        let kb = sample_kb("dedup").await;

        assert_eq!(kb.documents.len(), 3);
        // "vector index" appears on two documents but once in the vocabulary
        assert_eq!(
            kb.all_tags.iter().filter(|t| *t == "vector index").count(),
            1
        );
        let shared_idx = kb
            .all_tags
            .iter()
            .position(|t| t == "vector index")
            .unwrap();
        assert_eq!(
            kb.tag_to_doc_map[&shared_idx],
            BTreeSet::from([0usize, 1usize])
        );
        assert_eq!(kb.summary_index.len(), kb.documents.len());
        assert_eq!(kb.tag_index.len(), kb.all_tags.len());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());

        let kb = sample_kb("manuals").await;
        store.save(&kb).unwrap();

        let loaded = store.load("manuals").unwrap();
        assert_eq!(loaded.name, "manuals");
        assert_eq!(loaded.documents, kb.documents);
        assert_eq!(loaded.all_tags, kb.all_tags);
        assert_eq!(loaded.tag_to_doc_map, kb.tag_to_doc_map);
        assert_eq!(loaded.summary_index.len(), 3);

        assert_eq!(store.list_available().unwrap(), vec!["manuals".to_string()]);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());

        let err = store.load("nope").unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());

        let kb = sample_kb("broken").await;
        store.save(&kb).unwrap();

        // Replace the summary index with an empty one
        let empty = VectorIndex::new(32);
        empty
            .save(&dir.path().join("broken").join("summary_index.json"))
            .unwrap();

        let err = store.load("broken").unwrap_err();
        assert!(matches!(err, RetrievalError::Corruption(_)));
    }

    #[tokio::test]
    async fn test_missing_bundle_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());

        let kb = sample_kb("partial").await;
        store.save(&kb).unwrap();
        std::fs::remove_file(dir.path().join("partial").join("tag_index.json")).unwrap();

        let err = store.load("partial").unwrap_err();
        assert!(matches!(err, RetrievalError::Corruption(_)));
    }

    #[test]
    fn test_list_available_without_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeBaseStore::new(dir.path());
        assert!(store.list_available().unwrap().is_empty());
    }
}
