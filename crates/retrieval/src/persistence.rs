//! On-disk format for the vector index.
//!
//! An index directory holds two files:
//!
//! - `index.bin`: bincode blob with a magic tag, format version, dimension,
//!   row count and the flat embedding matrix.
//! - `chunks.jsonl`: a header line (format version, dimension, count and the
//!   SHA-256 of `index.bin`) followed by one
//!   [`StoredChunk`](crate::types::StoredChunk) per line.
//!
//! Each file is written to a uniquely named temporary file in the same
//! directory, synced, then persisted over the target. The sidecar is renamed last and carries the blob checksum, so a
//! crash between the two renames is detected at load time instead of pairing
//! a new blob with stale text.

use crate::store::DocumentStore;
use crate::vector_index::VectorIndex;
use bincode::Options;
use brief_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const INDEX_FILE: &str = "index.bin";
pub const SIDECAR_FILE: &str = "chunks.jsonl";
pub const FORMAT_VERSION: u32 = 1;

/// Suffix given to index files set aside by [`quarantine`]
pub const QUARANTINE_SUFFIX: &str = "corrupt";

const MAGIC: [u8; 4] = *b"BRFX";

#[derive(Serialize)]
struct IndexBlobRef<'a> {
    magic: [u8; 4],
    format_version: u32,
    dimension: u32,
    count: u64,
    vectors: &'a [f32],
}

#[derive(Deserialize)]
struct IndexBlob {
    magic: [u8; 4],
    format_version: u32,
    dimension: u32,
    count: u64,
    vectors: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SidecarHeader {
    format_version: u32,
    dimension: usize,
    count: usize,
    blob_sha256: String,
    saved_at: DateTime<Utc>,
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Whether `dir` contains a saved index.
pub fn exists(dir: &Path) -> bool {
    dir.join(INDEX_FILE).is_file() && dir.join(SIDECAR_FILE).is_file()
}

/// Write both index files into `dir`, creating it if needed.
pub fn save(index: &VectorIndex, dir: &Path) -> AppResult<()> {
    fs::create_dir_all(dir)?;

    let dimension = u32::try_from(index.dimension())
        .map_err(|_| AppError::Retrieval("Index dimension does not fit in u32".to_string()))?;
    let blob = IndexBlobRef {
        magic: MAGIC,
        format_version: FORMAT_VERSION,
        dimension,
        count: index.len() as u64,
        vectors: index.vectors(),
    };
    let blob_bytes = bincode_options().serialize(&blob)?;

    let header = SidecarHeader {
        format_version: FORMAT_VERSION,
        dimension: index.dimension(),
        count: index.len(),
        blob_sha256: checksum(&blob_bytes),
        saved_at: Utc::now(),
    };
    let mut sidecar = serde_json::to_vec(&header)?;
    sidecar.push(b'\n');
    index.store().write_jsonl(&mut sidecar)?;

    write_atomic(&dir.join(INDEX_FILE), &blob_bytes)?;
    write_atomic(&dir.join(SIDECAR_FILE), &sidecar)?;

    tracing::debug!(
        "Saved index with {} chunks to {}",
        index.len(),
        dir.display()
    );
    Ok(())
}

/// Read an index from `dir`, checking it against `expected_dimension`.
///
/// Every validation failure is reported as [`AppError::IndexLoad`].
pub fn load(dir: &Path, expected_dimension: usize) -> AppResult<VectorIndex> {
    load_inner(dir, expected_dimension).map_err(|e| match e {
        AppError::IndexLoad(_) => e,
        other => AppError::IndexLoad(format!("{}: {}", dir.display(), other)),
    })
}

fn load_inner(dir: &Path, expected_dimension: usize) -> AppResult<VectorIndex> {
    let blob_bytes = fs::read(dir.join(INDEX_FILE))?;
    let blob: IndexBlob = bincode_options()
        .with_limit(blob_bytes.len() as u64)
        .deserialize(&blob_bytes)?;

    if blob.magic != MAGIC {
        return Err(AppError::IndexLoad(format!(
            "{} is not an index file",
            dir.join(INDEX_FILE).display()
        )));
    }
    if blob.format_version != FORMAT_VERSION {
        return Err(AppError::IndexLoad(format!(
            "Unsupported index format version {} (expected {})",
            blob.format_version, FORMAT_VERSION
        )));
    }
    if blob.dimension as usize != expected_dimension {
        return Err(AppError::IndexLoad(format!(
            "Index dimension {} does not match configured dimension {}",
            blob.dimension, expected_dimension
        )));
    }

    let file = fs::File::open(dir.join(SIDECAR_FILE))?;
    let mut lines = BufReader::new(file).lines();
    let header_line = lines
        .next()
        .ok_or_else(|| AppError::IndexLoad("Sidecar file is empty".to_string()))??;
    let header: SidecarHeader = serde_json::from_str(&header_line)?;

    if header.blob_sha256 != checksum(&blob_bytes) {
        return Err(AppError::IndexLoad(
            "Sidecar checksum does not match index blob".to_string(),
        ));
    }
    if header.format_version != FORMAT_VERSION || header.dimension != expected_dimension {
        return Err(AppError::IndexLoad(format!(
            "Sidecar header (version {}, dimension {}) does not match index",
            header.format_version, header.dimension
        )));
    }

    let store = DocumentStore::from_jsonl(lines)?;

    if store.len() != header.count || blob.count != header.count as u64 {
        return Err(AppError::IndexLoad(format!(
            "Chunk count mismatch: blob {}, header {}, sidecar {}",
            blob.count,
            header.count,
            store.len()
        )));
    }

    let index = VectorIndex::from_parts(expected_dimension, blob.vectors, store)?;

    tracing::debug!(
        "Loaded index with {} chunks from {}",
        index.len(),
        dir.display()
    );
    Ok(index)
}

/// Move the index files in `dir` aside as `<name>.corrupt`.
///
/// An earlier quarantined copy is replaced. Returns the new paths.
pub fn quarantine(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut moved = Vec::new();
    for name in [INDEX_FILE, SIDECAR_FILE] {
        let path = dir.join(name);
        if !path.exists() {
            continue;
        }
        let target = dir.join(format!("{}.{}", name, QUARANTINE_SUFFIX));
        fs::rename(&path, &target)?;
        tracing::warn!("Moved {} to {}", path.display(), target.display());
        moved.push(target);
    }
    Ok(moved)
}

/// Write `bytes` to `path` via a synced temporary file in the same directory.
///
/// Concurrent writers each get their own temporary file; the last persist
/// wins.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}
