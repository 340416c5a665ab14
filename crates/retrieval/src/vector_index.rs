//! Exact cosine-similarity index over chunk embeddings.
//!
//! Embeddings live in one contiguous row-major matrix; row `i` belongs to the
//! sidecar record at position `i` of the [`DocumentStore`]. Search is a flat
//! brute-force scan, so results are exact: ordered by descending cosine
//! similarity, ties going to the earlier-inserted chunk.
//!
//! The index is not internally synchronized. The retrieval service keeps it
//! behind a reader/writer lock.

use crate::persistence;
use crate::store::DocumentStore;
use crate::types::{DocumentChunk, MetadataValue, ScoredChunk};
use brief_core::{AppError, AppResult};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    vectors: Vec<f32>,
    norms: Vec<f32>,
    store: DocumentStore,
}

impl VectorIndex {
    /// Create an empty index for embeddings of `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            norms: Vec::new(),
            store: DocumentStore::new(),
        }
    }

    /// Assemble an index from a vector matrix and its sidecar store.
    pub(crate) fn from_parts(
        dimension: usize,
        vectors: Vec<f32>,
        store: DocumentStore,
    ) -> AppResult<Self> {
        if dimension == 0 {
            return Err(AppError::Retrieval("Index dimension is zero".to_string()));
        }
        if vectors.len() != store.len() * dimension {
            return Err(AppError::Retrieval(format!(
                "Vector matrix holds {} values, expected {} rows of {}",
                vectors.len(),
                store.len(),
                dimension
            )));
        }

        let norms = vectors.chunks_exact(dimension).map(l2_norm).collect();

        Ok(Self {
            dimension,
            vectors,
            norms,
            store,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub(crate) fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Embedding stored at `position`.
    pub fn embedding(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Append a chunk and return its position.
    ///
    /// Fails without modifying the index when the embedding has the wrong
    /// dimension or holds non-finite values, when a metadata float is not
    /// finite (JSON cannot represent it), or when the id is already present.
    pub fn insert(&mut self, chunk: DocumentChunk) -> AppResult<usize> {
        if chunk.embedding.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: chunk.embedding.len(),
            });
        }
        if chunk.embedding.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Embedding(format!(
                "Embedding for chunk '{}' contains non-finite values",
                chunk.id
            )));
        }

        if let Some((key, _)) = chunk
            .metadata
            .iter()
            .find(|(_, v)| matches!(v, MetadataValue::Float(f) if !f.is_finite()))
        {
            return Err(AppError::Validation(format!(
                "Metadata '{}' of chunk '{}' is not a finite number",
                key, chunk.id
            )));
        }

        let position = self.store.push(chunk.id, chunk.text, chunk.metadata)?;
        self.norms.push(l2_norm(&chunk.embedding));
        self.vectors.extend_from_slice(&chunk.embedding);

        Ok(position)
    }

    /// Return up to `k` chunks most similar to `vector`.
    ///
    /// An empty index or `k == 0` yields an empty result regardless of the
    /// query vector.
    pub fn query(&self, vector: &[f32], k: usize) -> AppResult<Vec<ScoredChunk>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let query_norm = l2_norm(vector);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .zip(&self.norms)
            .enumerate()
            .map(|(position, (row, norm))| (position, cosine(row, *norm, vector, query_norm)))
            .collect();

        // Stable tie-break: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .filter_map(|(position, score)| {
                self.store.get(position).map(|chunk| ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect())
    }

    /// Remove every chunk. This is the only way chunks leave the index.
    pub fn reset(&mut self) {
        self.vectors.clear();
        self.norms.clear();
        self.store.clear();
    }

    /// Persist the index blob and sidecar into `dir`.
    pub fn save(&self, dir: &Path) -> AppResult<()> {
        persistence::save(self, dir)
    }

    /// Restore an index previously written by [`VectorIndex::save`].
    pub fn load(dir: &Path, expected_dimension: usize) -> AppResult<Self> {
        persistence::load(dir, expected_dimension)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(row: &[f32], row_norm: f32, query: &[f32], query_norm: f32) -> f32 {
    if row_norm == 0.0 || query_norm == 0.0 {
        return 0.0;
    }

    let dot: f32 = row.iter().zip(query).map(|(a, b)| a * b).sum();
    dot / (row_norm * query_norm)
}
