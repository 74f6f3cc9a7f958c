use crate::error::ChatError;
use crate::models::{ChatOptions, Chunk};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChatError> {
        if chunk_size == 0 {
            return Err(ChatError::Configuration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ChatError::Configuration(format!(
                "chunk overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl TryFrom<&ChatOptions> for ChunkingConfig {
    type Error = ChatError;

    fn try_from(value: &ChatOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Slides a `chunk_size` character window over `text`, advancing by
/// `chunk_size - overlap`. The last window ends at the end of the text and
/// may be shorter than `chunk_size`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ChatError> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(chunk_with_config(document_id, text, config))
}

pub fn chunk_with_config(document_id: &str, text: &str, config: ChunkingConfig) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let index = chunks.len() as u64;

        chunks.push(Chunk {
            chunk_id: make_chunk_id(document_id, index, &piece),
            document_id: document_id.to_string(),
            chunk_index: index,
            text: piece,
            char_start: start,
            char_end: end,
        });

        if end == chars.len() {
            break;
        }
        start += config.step();
    }

    chunks
}

fn make_chunk_id(document_id: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
