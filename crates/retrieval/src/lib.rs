//! Semantic retrieval for market briefs.
//!
//! Text passages (from files, web pages or the built-in market notes) are
//! embedded, stored in an exact cosine-similarity index and persisted as a
//! bincode blob plus a JSONL sidecar.

pub mod embeddings;
pub mod persistence;
pub mod service;
pub mod sources;
pub mod store;
pub mod text;
pub mod types;
pub mod vector_index;


// Re-export commonly used types
pub use embeddings::{create_provider, EmbeddingProvider};
pub use service::RetrievalService;
pub use sources::{WebFetcher, WebPage, DEFAULT_MARKET_NOTES};
pub use store::DocumentStore;
pub use types::{
    ChunkMetadata, DocumentChunk, IndexStats, IngestFailure, IngestReport, MetadataValue,
    ScoredChunk, SearchHit, StoredChunk,
};
pub use vector_index::VectorIndex;
