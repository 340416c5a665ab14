//! Retrieval service: embedding plus the shared vector index.
//!
//! The index is owned by the service and shared behind a tokio `RwLock`.
//! Inserts take the write lock one chunk at a time; searches share the read
//! lock, so a search never observes a half-inserted chunk.

use crate::embeddings::EmbeddingProvider;
use crate::persistence;
use crate::types::{
    ChunkMetadata, DocumentChunk, IndexStats, IngestFailure, IngestReport, SearchHit,
};
use crate::vector_index::VectorIndex;
use brief_core::config::IndexSettings;
use brief_core::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct RetrievalService {
    index: Arc<RwLock<VectorIndex>>,
    embedder: Arc<dyn EmbeddingProvider>,
    index_dir: Option<PathBuf>,
    persist_after_ingest: bool,
    // Serializes writers of the index files
    persist_lock: Mutex<()>,
}

impl RetrievalService {
    /// Open the index persisted under `index_dir`.
    ///
    /// A missing index starts empty. An index that fails to load is an
    /// error unless `fallback_to_empty_on_load_error` is set, in which case
    /// its files are moved aside as `*.corrupt` and the index starts empty.
    pub fn open(
        index_dir: &Path,
        settings: &IndexSettings,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> AppResult<Self> {
        let dimension = embedder.dimensions();

        let index = if persistence::exists(index_dir) {
            match VectorIndex::load(index_dir, dimension) {
                Ok(index) => {
                    tracing::info!(
                        "Loaded retrieval index with {} chunks from {}",
                        index.len(),
                        index_dir.display()
                    );
                    index
                }
                Err(e) if settings.fallback_to_empty_on_load_error => {
                    tracing::warn!("{}; starting with an empty index", e);
                    persistence::quarantine(index_dir)?;
                    VectorIndex::new(dimension)
                }
                Err(e) => return Err(e),
            }
        } else {
            tracing::debug!(
                "No index at {}, starting empty",
                index_dir.display()
            );
            VectorIndex::new(dimension)
        };

        Ok(Self {
            index: Arc::new(RwLock::new(index)),
            embedder,
            index_dir: Some(index_dir.to_path_buf()),
            persist_after_ingest: settings.persist_after_ingest,
            persist_lock: Mutex::new(()),
        })
    }

    /// Service over an empty index that is never written to disk.
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = embedder.dimensions();
        Self {
            index: Arc::new(RwLock::new(VectorIndex::new(dimension))),
            embedder,
            index_dir: None,
            persist_after_ingest: false,
            persist_lock: Mutex::new(()),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Embed and index `texts`.
    ///
    /// `metadata` is either empty or has one entry per text. Items that fail
    /// to embed or insert are reported and skipped; earlier items stay
    /// indexed.
    pub async fn ingest(
        &self,
        texts: Vec<String>,
        metadata: Vec<ChunkMetadata>,
    ) -> AppResult<IngestReport> {
        if !metadata.is_empty() && metadata.len() != texts.len() {
            return Err(AppError::InvalidRequest(format!(
                "Got {} metadata entries for {} texts",
                metadata.len(),
                texts.len()
            )));
        }

        let mut metadata = metadata.into_iter();
        let mut report = IngestReport::default();

        for (index, text) in texts.into_iter().enumerate() {
            let chunk_metadata = metadata.next().unwrap_or_default();

            let embedding = match self.embedder.embed(&text).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!("Skipping item {}: {}", index, e);
                    report.failures.push(IngestFailure {
                        index,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let chunk = DocumentChunk::new(text, embedding).with_metadata(chunk_metadata);
            let id = chunk.id.clone();

            let inserted = self.index.write().await.insert(chunk);
            match inserted {
                Ok(_) => {
                    report.ingested += 1;
                    report.chunk_ids.push(id);
                }
                Err(e) => {
                    tracing::warn!("Skipping item {}: {}", index, e);
                    report.failures.push(IngestFailure {
                        index,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Ingested {} chunks ({} failed)",
            report.ingested,
            report.failures.len()
        );

        if self.persist_after_ingest && report.ingested > 0 {
            self.flush().await?;
        }

        Ok(report)
    }

    /// Return the `k` chunks closest to `query`.
    pub async fn search(&self, query: &str, k: usize) -> AppResult<Vec<SearchHit>> {
        if k == 0 || self.index.read().await.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await.map_err(|e| match e {
            AppError::Embedding(_) => e,
            other => AppError::Embedding(other.to_string()),
        })?;

        let index = self.index.read().await;
        let hits = index
            .query(&vector, k)?
            .into_iter()
            .map(SearchHit::from)
            .collect::<Vec<_>>();

        tracing::debug!("Search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Write the index to disk. A no-op for in-memory services.
    pub async fn flush(&self) -> AppResult<()> {
        let Some(dir) = &self.index_dir else {
            tracing::debug!("In-memory index, nothing to flush");
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;
        let index = self.index.read().await;
        index.save(dir)?;
        tracing::info!("Persisted {} chunks to {}", index.len(), dir.display());
        Ok(())
    }

    pub async fn stats(&self) -> IndexStats {
        let index = self.index.read().await;
        IndexStats {
            chunks: index.len(),
            dimension: index.dimension(),
            index_dir: self.index_dir.clone(),
            persisted: self
                .index_dir
                .as_deref()
                .map(persistence::exists)
                .unwrap_or(false),
        }
    }

    /// Drop every chunk and persist the empty index.
    pub async fn reset(&self) -> AppResult<()> {
        self.index.write().await.reset();
        tracing::info!("Retrieval index reset");
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::TrigramProvider;
    use tempfile::TempDir;

    fn trigram() -> Arc<dyn EmbeddingProvider> {
        Arc::new(TrigramProvider::new(128))
    }

    #[tokio::test]
    async fn test_ingest_skips_and_reports_failures() {
        let service = RetrievalService::in_memory(trigram());

        let report = service
            .ingest(
                vec![
                    "TSMC beat earnings estimates".to_string(),
                    "   ".to_string(),
                    "Samsung gave mixed guidance".to_string(),
                ],
                Vec::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.ingested, 2);
        assert_eq!(report.chunk_ids.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(service.stats().await.chunks, 2);
    }

    #[tokio::test]
    async fn test_metadata_length_must_match() {
        let service = RetrievalService::in_memory(trigram());
        let err = service
            .ingest(
                vec!["a text".to_string(), "another".to_string()],
                vec![ChunkMetadata::new()],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(service.stats().await.chunks, 0);
    }

    #[tokio::test]
    async fn test_search_empty_index() {
        let service = RetrievalService::in_memory(trigram());
        assert!(service.search("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_blank_query_is_embedding_error() {
        let service = RetrievalService::in_memory(trigram());
        service
            .ingest(vec!["Bond yields climbed".to_string()], Vec::new())
            .await
            .unwrap();

        assert!(matches!(
            service.search("  ", 3).await,
            Err(AppError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn test_open_persists_and_reloads() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("index");
        let settings = IndexSettings::default();

        {
            let service = RetrievalService::open(&dir, &settings, trigram()).unwrap();
            service
                .ingest(vec!["TSMC beat earnings estimates".to_string()], Vec::new())
                .await
                .unwrap();
            assert!(service.stats().await.persisted);
        }

        let reopened = RetrievalService::open(&dir, &settings, trigram()).unwrap();
        let hits = reopened.search("TSMC earnings", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "TSMC beat earnings estimates");
    }

    fn with_fallback() -> IndexSettings {
        IndexSettings {
            fallback_to_empty_on_load_error: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_corrupt_index_fallback() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        std::fs::write(dir.join(persistence::INDEX_FILE), b"junk").unwrap();
        std::fs::write(dir.join(persistence::SIDECAR_FILE), b"junk\n").unwrap();

        let result = RetrievalService::open(&dir, &IndexSettings::default(), trigram());
        assert!(matches!(result, Err(AppError::IndexLoad(_))));
        assert_eq!(std::fs::read(dir.join(persistence::INDEX_FILE)).unwrap(), b"junk");

        let service = RetrievalService::open(&dir, &with_fallback(), trigram()).unwrap();
        assert_eq!(service.stats().await.chunks, 0);
        assert!(!persistence::exists(&dir));
        assert_eq!(std::fs::read(dir.join("index.bin.corrupt")).unwrap(), b"junk");
    }

    async fn seed_index(dir: &Path, embedder: Arc<dyn EmbeddingProvider>, count: usize) {
        let service = RetrievalService::open(dir, &IndexSettings::default(), embedder).unwrap();
        let texts = (0..count)
            .map(|i| format!("Semiconductor note number {}", i))
            .collect();
        let report = service.ingest(texts, Vec::new()).await.unwrap();
        assert_eq!(report.ingested, count);
    }

    #[tokio::test]
    async fn test_open_with_changed_dimension_keeps_corpus() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        seed_index(&dir, Arc::new(TrigramProvider::new(64)), 5).await;

        // Default settings refuse to start over a corpus built at another dimension
        let wider: Arc<dyn EmbeddingProvider> = Arc::new(TrigramProvider::new(128));
        assert!(matches!(
            RetrievalService::open(&dir, &IndexSettings::default(), wider),
            Err(AppError::IndexLoad(_))
        ));

        let original: Arc<dyn EmbeddingProvider> = Arc::new(TrigramProvider::new(64));
        let reopened = RetrievalService::open(&dir, &IndexSettings::default(), original).unwrap();
        assert_eq!(reopened.stats().await.chunks, 5);
    }

    #[tokio::test]
    async fn test_fallback_then_ingest_preserves_old_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("index");
        seed_index(&dir, Arc::new(TrigramProvider::new(64)), 5).await;

        let service = RetrievalService::open(&dir, &with_fallback(), trigram()).unwrap();
        assert_eq!(service.stats().await.chunks, 0);
        service
            .ingest(vec!["Won weakened against the dollar".to_string()], Vec::new())
            .await
            .unwrap();
        assert_eq!(service.stats().await.chunks, 1);

        // The set-aside files still hold the original corpus
        let restored = temp.path().join("restored");
        std::fs::create_dir(&restored).unwrap();
        for name in [persistence::INDEX_FILE, persistence::SIDECAR_FILE] {
            std::fs::copy(
                dir.join(format!("{}.{}", name, persistence::QUARANTINE_SUFFIX)),
                restored.join(name),
            )
            .unwrap();
        }
        let recovered = VectorIndex::load(&restored, 64).unwrap();
        assert_eq!(recovered.len(), 5);
    }

    #[tokio::test]
    async fn test_non_finite_metadata_does_not_strand_the_index() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        let settings = IndexSettings::default();

        let mut bad = ChunkMetadata::new();
        bad.insert("weight".to_string(), f64::NAN.into());
        let mut good = ChunkMetadata::new();
        good.insert("weight".to_string(), crate::types::MetadataValue::Float(0.5));

        let service = RetrievalService::open(&dir, &settings, trigram()).unwrap();
        let report = service
            .ingest(
                vec![
                    "Foundry utilisation recovered".to_string(),
                    "Memory prices stabilised".to_string(),
                ],
                vec![bad, good],
            )
            .await
            .unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert!(report.failures[0].error.contains("Validation"));

        let reopened = RetrievalService::open(&dir, &settings, trigram()).unwrap();
        let hits = reopened.search("memory prices", 1).await.unwrap();
        assert_eq!(hits[0].text, "Memory prices stabilised");
    }

    #[tokio::test]
    async fn test_reset_clears_and_persists() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        let settings = IndexSettings::default();

        let service = RetrievalService::open(&dir, &settings, trigram()).unwrap();
        service
            .ingest(vec!["Chip exports rose".to_string()], Vec::new())
            .await
            .unwrap();
        service.reset().await.unwrap();
        assert_eq!(service.stats().await.chunks, 0);

        let reopened = RetrievalService::open(&dir, &settings, trigram()).unwrap();
        assert_eq!(reopened.stats().await.chunks, 0);
    }
}
