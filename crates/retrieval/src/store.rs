//! Document store: the text/metadata side of the index.
//!
//! Records are append-only and addressed by position; position `i` holds the
//! text for embedding row `i` of the vector index.

use crate::types::{ChunkMetadata, StoredChunk};
use brief_core::{AppError, AppResult};
use chrono::Utc;
use std::collections::HashSet;
use std::io::{self, Write};

#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    records: Vec<StoredChunk>,
    ids: HashSet<String>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted records.
    ///
    /// Positions must be dense and in order, and ids unique.
    pub fn from_records(records: Vec<StoredChunk>) -> AppResult<Self> {
        let mut store = Self::new();
        for (expected, record) in records.into_iter().enumerate() {
            if record.position != expected {
                return Err(AppError::Retrieval(format!(
                    "Record '{}' has position {}, expected {}",
                    record.id, record.position, expected
                )));
            }
            if !store.ids.insert(record.id.clone()) {
                return Err(AppError::DuplicateChunk(record.id));
            }
            store.records.push(record);
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, position: usize) -> Option<&StoredChunk> {
        self.records.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredChunk> {
        self.records.iter()
    }

    /// Append a record and return its position.
    pub fn push(&mut self, id: String, text: String, metadata: ChunkMetadata) -> AppResult<usize> {
        if self.ids.contains(&id) {
            return Err(AppError::DuplicateChunk(id));
        }

        let position = self.records.len();
        self.ids.insert(id.clone());
        self.records.push(StoredChunk {
            position,
            id,
            text,
            metadata,
            ingested_at: Utc::now(),
        });
        Ok(position)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.ids.clear();
    }

    /// Write one JSON record per line.
    pub fn write_jsonl<W: Write>(&self, writer: &mut W) -> AppResult<()> {
        for record in &self.records {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Rebuild a store from JSONL lines. Blank lines are ignored.
    pub fn from_jsonl<I>(lines: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        let mut records = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str::<StoredChunk>(&line)?);
        }
        Self::from_records(records)
    }
}
