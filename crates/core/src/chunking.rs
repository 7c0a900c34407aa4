use crate::error::IngestError;
use crate::models::PipelineSettings;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl From<&PipelineSettings> for ChunkingConfig {
    fn from(value: &PipelineSettings) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// A piece of document text that gets its own embedding row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: u64,
    pub text: String,
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fixed character windows with overlap.
pub fn split_windows(normalized: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.max_chars).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}

pub fn build_chunks(
    document_id: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<Vec<TextChunk>, IngestError> {
    config.validate()?;
    let normalized = normalize_whitespace(text);

    Ok(split_windows(&normalized, config)
        .into_iter()
        .enumerate()
        .map(|(index, piece)| TextChunk {
            chunk_id: make_chunk_id(document_id, index as u64, &piece),
            document_id: document_id.to_string(),
            chunk_index: index as u64,
            text: piece,
        })
        .collect())
}

fn make_chunk_id(document_id: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
