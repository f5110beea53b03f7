//! Append-only vector index.
//!
//! Flat (brute-force) cosine index sized for a personal corpus of a few tens
//! of thousands of chunks. Vector ids are the append positions and are never
//! reused; deletion tombstones an entry so later searches skip it. The whole
//! index snapshots to a single binary file: a fixed header followed by one
//! record per vector (id, tombstone flag, little-endian f32 components).

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::core::errors::ApiError;

const MAGIC: &[u8; 4] = b"RVIX";
const VERSION: u32 = 1;

/// A raw nearest-neighbor hit: vector id plus cosine distance
/// (`1 - similarity`, lower is better).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub vector_id: u32,
    pub distance: f32,
}

#[derive(Debug, Default)]
pub struct VectorIndex {
    vectors: Vec<Vec<f32>>,
    deleted: HashSet<u32>,
    dimension: Option<usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of live (non-deleted) vectors.
    pub fn ntotal(&self) -> usize {
        self.vectors.len() - self.deleted.len()
    }

    /// The id the next appended vector will receive. Diverges from
    /// `ntotal()` once tombstones exist; ingestion seeds its id counter from
    /// here so ids are never reused.
    pub fn next_id(&self) -> u32 {
        self.vectors.len() as u32
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Append embeddings, assigning consecutive ids starting at `next_id()`.
    /// A dimension mismatch rejects the whole batch before anything is added.
    pub fn add(&mut self, embeddings: Vec<Vec<f32>>) -> Result<(), ApiError> {
        if embeddings.is_empty() {
            return Ok(());
        }

        let dim = match self.dimension {
            Some(dim) => dim,
            None => {
                let first = embeddings[0].len();
                if first == 0 {
                    return Err(ApiError::BadRequest("empty embedding vector".to_string()));
                }
                first
            }
        };

        for embedding in &embeddings {
            if embedding.len() != dim {
                return Err(ApiError::BadRequest(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    dim,
                    embedding.len()
                )));
            }
        }

        self.dimension = Some(dim);
        self.vectors.extend(embeddings);
        Ok(())
    }

    /// Nearest neighbors of `query`, ascending by distance. Deleted ids are
    /// never returned. An empty index yields an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, ApiError> {
        if query.is_empty() || self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if let Some(dim) = self.dimension {
            if query.len() != dim {
                return Err(ApiError::BadRequest(format!(
                    "query dimension mismatch: expected {}, got {}",
                    dim,
                    query.len()
                )));
            }
        }

        let mut hits: Vec<VectorHit> = self
            .vectors
            .iter()
            .enumerate()
            .filter(|(id, _)| !self.deleted.contains(&(*id as u32)))
            .map(|(id, vector)| VectorHit {
                vector_id: id as u32,
                distance: 1.0 - cosine_similarity(query, vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);

        Ok(hits)
    }

    /// Tombstone the given ids. Unknown or already-deleted ids are ignored.
    pub fn delete(&mut self, vector_ids: &[u32]) {
        for &id in vector_ids {
            if (id as usize) < self.vectors.len() {
                self.deleted.insert(id);
            }
        }
    }

    /// Write the snapshot, replacing any previous file atomically via a
    /// temp-file rename.
    pub fn save(&self, path: &Path) -> Result<(), ApiError> {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.dimension.unwrap_or(0) as u32).to_le_bytes());
        buf.extend_from_slice(&(self.vectors.len() as u32).to_le_bytes());

        for (id, vector) in self.vectors.iter().enumerate() {
            buf.extend_from_slice(&(id as u32).to_le_bytes());
            buf.push(u8::from(self.deleted.contains(&(id as u32))));
            for component in vector {
                buf.extend_from_slice(&component.to_le_bytes());
            }
        }

        let tmp = path.with_extension("idx.tmp");
        let mut file = fs::File::create(&tmp).map_err(ApiError::internal)?;
        file.write_all(&buf).map_err(ApiError::internal)?;
        file.sync_all().map_err(ApiError::internal)?;
        fs::rename(&tmp, path).map_err(ApiError::internal)?;

        Ok(())
    }

    /// Load a snapshot. A missing or corrupt file degrades to an empty index
    /// instead of failing startup; corruption is logged loudly.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }

        match Self::try_load(path) {
            Ok(index) => index,
            Err(err) => {
                tracing::error!(
                    "vector index snapshot at {:?} is unreadable ({}); starting empty",
                    path,
                    err
                );
                Self::new()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self, String> {
        let mut bytes = Vec::new();
        fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| e.to_string())?;

        let mut cursor = 0usize;

        if take(&bytes, &mut cursor, 4)? != MAGIC {
            return Err("bad magic".to_string());
        }
        let version = read_u32(&bytes, &mut cursor)?;
        if version != VERSION {
            return Err(format!("unsupported snapshot version {version}"));
        }
        let dim = read_u32(&bytes, &mut cursor)? as usize;
        let count = read_u32(&bytes, &mut cursor)? as usize;

        let mut index = Self::new();
        if dim > 0 {
            index.dimension = Some(dim);
        }

        for expected_id in 0..count {
            let id = read_u32(&bytes, &mut cursor)?;
            if id as usize != expected_id {
                return Err(format!("out-of-order vector id {id}"));
            }
            let tombstone = take(&bytes, &mut cursor, 1)?[0] != 0;
            let raw = take(&bytes, &mut cursor, dim * 4)?;
            let vector: Vec<f32> = raw
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            index.vectors.push(vector);
            if tombstone {
                index.deleted.insert(id);
            }
        }

        Ok(index)
    }
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, n: usize) -> Result<&'a [u8], String> {
    let slice = bytes
        .get(*cursor..*cursor + n)
        .ok_or_else(|| "truncated snapshot".to_string())?;
    *cursor += n;
    Ok(slice)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, String> {
    let raw = take(bytes, cursor, 4)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
