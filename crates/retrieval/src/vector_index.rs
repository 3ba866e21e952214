//! Flat inner-product vector index
//!
//! Vectors are L2-normalized on insertion and queries are normalized
//! before scoring, so inner product equals cosine similarity. Index
//! identity is positional: the integer returned by `search` is the
//! insertion position and stays stable for the lifetime of the index.

use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RetrievalError;

/// Sentinel index for padding entries past the index population.
pub const SENTINEL_INDEX: i64 = -1;

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Flat index over fixed-dimension float vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Create an empty index for vectors of dimension `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    /// Number of vectors in the index.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Vector dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Append vectors, normalizing each. Insertion order is the index
    /// identity; there is no deletion or compaction.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), RetrievalError> {
        for vector in vectors {
            if vector.len() != self.dim {
                return Err(RetrievalError::Index(format!(
                    "Vector dimension {} does not match index dimension {}",
                    vector.len(),
                    self.dim
                )));
            }
            let mut normalized = vector.clone();
            l2_normalize(&mut normalized);
            self.vectors.push(normalized);
        }
        Ok(())
    }

    /// Top-k search by inner product.
    ///
    /// Returns exactly `k` `(score, index)` pairs in non-increasing score
    /// order. Entries past the index population are
    /// `(f32::NEG_INFINITY, -1)` sentinels. Ties resolve toward the lower
    /// insertion index. Never errors: a query of the wrong dimension or an
    /// under-populated index yields sentinel entries, not a failure.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, i64)> {
        if query.len() != self.dim {
            tracing::warn!(
                query_dim = query.len(),
                index_dim = self.dim,
                "Query dimension mismatch, returning no hits"
            );
            return vec![(f32::NEG_INFINITY, SENTINEL_INDEX); k];
        }

        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        let mut scored: Vec<(f32, i64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (dot(&normalized, v), i as i64))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(k);

        while scored.len() < k {
            scored.push((f32::NEG_INFINITY, SENTINEL_INDEX));
        }

        scored
    }

    /// Persist the index as a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), RetrievalError> {
        let json = serde_json::to_string(self)
            .map_err(|e| RetrievalError::Io(format!("Failed to serialize index: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| RetrievalError::Io(format!("Failed to write {}: {e}", path.display())))
    }

    /// Load an index from a JSON file, verifying stored dimensions.
    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Io(format!("Failed to read {}: {e}", path.display())))?;

        let index: Self = serde_json::from_str(&content).map_err(|e| {
            RetrievalError::Corruption(format!("Invalid index file {}: {e}", path.display()))
        })?;

        if let Some(bad) = index.vectors.iter().position(|v| v.len() != index.dim) {
            return Err(RetrievalError::Corruption(format!(
                "Index file {}: vector {} has dimension {} (expected {})",
                path.display(),
                bad,
                index.vectors[bad].len(),
                index.dim
            )));
        }

        Ok(index)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
