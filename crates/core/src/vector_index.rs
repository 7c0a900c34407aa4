//! Flat nearest-neighbour index persisted as two artifacts:
//!
//! - `faiss.index`: `PPVX` magic, `u32` format version, `u32` dimensions,
//!   `u32` row count, then `count * dimensions` little-endian `f32` values.
//! - `docstore.json`: the chunk behind each row, in row order.
//!
//! Search is brute-force cosine similarity; one index holds a single document.

use crate::chunking::TextChunk;
use crate::embeddings::cosine_similarity;
use crate::error::IngestError;
use crate::models::{DOCSTORE_FILE, VECTOR_INDEX_FILE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"PPVX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocStore {
    pub model_id: String,
    pub entries: Vec<TextChunk>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimensions: usize,
    rows: Vec<Vec<f32>>,
    docstore: DocStore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub score: f32,
    pub chunk: TextChunk,
}

impl VectorIndex {
    pub fn from_embeddings(
        model_id: &str,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self, IngestError> {
        if chunks.len() != embeddings.len() {
            return Err(IngestError::InvalidIndex(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }
        let dimensions = embeddings
            .first()
            .map(Vec::len)
            .ok_or_else(|| IngestError::InvalidIndex("no rows to index".to_string()))?;
        if dimensions == 0 {
            return Err(IngestError::InvalidIndex("zero-dimensional embeddings".to_string()));
        }
        if let Some(row) = embeddings.iter().find(|row| row.len() != dimensions) {
            return Err(IngestError::InvalidIndex(format!(
                "embedding dimension {} != {}",
                row.len(),
                dimensions
            )));
        }

        Ok(Self {
            dimensions,
            rows: embeddings,
            docstore: DocStore {
                model_id: model_id.to_string(),
                entries: chunks,
            },
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn docstore(&self) -> &DocStore {
        &self.docstore
    }

    /// Top `k` chunks by cosine similarity, best first.
    pub fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IngestError> {
        if query.len() != self.dimensions {
            return Err(IngestError::InvalidIndex(format!(
                "query vector dim {} is not {}",
                query.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .rows
            .iter()
            .enumerate()
            .map(|(position, row)| (position, cosine_similarity(query, row)))
            .collect();
        scored.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, score)| ScoredChunk {
                score,
                chunk: self.docstore.entries[position].clone(),
            })
            .collect())
    }

    pub fn encode_index(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.rows.len() * self.dimensions * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.rows.len() as u32).to_le_bytes());
        for row in &self.rows {
            for value in row {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }

    pub fn decode_index(bytes: &[u8]) -> Result<(usize, Vec<Vec<f32>>), IngestError> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(IngestError::InvalidIndex("missing index header".to_string()));
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(IngestError::InvalidIndex(format!("unsupported index version {version}")));
        }
        let dimensions = read_u32(&bytes[8..12]) as usize;
        let count = read_u32(&bytes[12..16]) as usize;

        let body = &bytes[HEADER_LEN..];
        let expected = dimensions
            .checked_mul(count)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| IngestError::InvalidIndex("index size overflow".to_string()))?;
        if body.len() != expected {
            return Err(IngestError::InvalidIndex(format!(
                "invalid index byte length: expected {expected}, got {}",
                body.len()
            )));
        }
        if dimensions == 0 {
            return Ok((0, Vec::new()));
        }

        let rows = body
            .chunks_exact(dimensions * 4)
            .map(|row| {
                row.chunks_exact(4)
                    .map(|value| f32::from_le_bytes([value[0], value[1], value[2], value[3]]))
                    .collect()
            })
            .collect();
        Ok((dimensions, rows))
    }

    /// Write both artifacts into `dir` and return their paths.
    pub async fn save(&self, dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
        let docstore_path = dir.join(DOCSTORE_FILE);
        let index_path = dir.join(VECTOR_INDEX_FILE);
        tokio::fs::write(&docstore_path, serde_json::to_vec(&self.docstore)?).await?;
        tokio::fs::write(&index_path, self.encode_index()).await?;
        Ok(vec![docstore_path, index_path])
    }

    pub async fn load(dir: &Path) -> Result<Self, IngestError> {
        let docstore_bytes = tokio::fs::read(dir.join(DOCSTORE_FILE)).await?;
        let index_bytes = tokio::fs::read(dir.join(VECTOR_INDEX_FILE)).await?;
        Self::from_artifacts(&docstore_bytes, &index_bytes)
    }

    pub fn from_artifacts(docstore_bytes: &[u8], index_bytes: &[u8]) -> Result<Self, IngestError> {
        let docstore: DocStore = serde_json::from_slice(docstore_bytes)?;
        let (dimensions, rows) = Self::decode_index(index_bytes)?;
        if rows.len() != docstore.entries.len() {
            return Err(IngestError::InvalidIndex(format!(
                "index has {} rows but docstore has {} entries",
                rows.len(),
                docstore.entries.len()
            )));
        }
        Ok(Self {
            dimensions,
            rows,
            docstore,
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buffer = [0u8; 4];
    buffer.copy_from_slice(bytes);
    u32::from_le_bytes(buffer)
}
