//! Retrieval type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Scalar metadata value attached to a chunk (source, date, symbol, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Chunk metadata. Key order carries no meaning.
pub type ChunkMetadata = BTreeMap<String, MetadataValue>;

/// A text chunk with its embedding, as handed to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Unique chunk identifier, never reused
    pub id: String,

    /// Source passage
    pub text: String,

    /// Embedding vector of the index dimension
    pub embedding: Vec<f32>,

    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    /// Create a chunk with a freshly generated id.
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            embedding,
            metadata: ChunkMetadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Sidecar record: everything about a chunk except its embedding.
///
/// `position` is the row of the embedding inside the index blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub position: usize,
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    pub ingested_at: DateTime<Utc>,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,

    /// Cosine similarity in [-1.0, 1.0], higher is closer
    pub score: f32,
}

/// Caller-facing search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl From<ScoredChunk> for SearchHit {
    fn from(scored: ScoredChunk) -> Self {
        Self {
            id: scored.chunk.id,
            text: scored.chunk.text,
            score: scored.score,
            metadata: scored.chunk.metadata,
        }
    }
}

/// An item that could not be ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    /// Position of the text in the submitted batch
    pub index: usize,

    pub error: String,
}

/// Outcome of an ingest batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Number of chunks added to the index
    pub ingested: usize,

    /// Ids assigned to the added chunks, in batch order
    pub chunk_ids: Vec<String>,

    /// Items skipped because embedding or insertion failed
    pub failures: Vec<IngestFailure>,
}

/// Statistics for the retrieval index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub chunks: usize,
    pub dimension: usize,
    pub index_dir: Option<PathBuf>,
    pub persisted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_value_untagged_roundtrip() {
        let mut metadata = ChunkMetadata::new();
        metadata.insert("symbol".to_string(), "TSM".into());
        metadata.insert("year".to_string(), 2024i64.into());
        metadata.insert("weight".to_string(), 0.5f64.into());
        metadata.insert("audited".to_string(), true.into());

        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(
            json,
            r#"{"audited":true,"symbol":"TSM","weight":0.5,"year":2024}"#
        );

        let parsed: ChunkMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn test_new_chunks_get_distinct_ids() {
        let a = DocumentChunk::new("a", vec![1.0]);
        let b = DocumentChunk::new("b", vec![1.0]);
        assert_ne!(a.id, b.id);
    }
}
