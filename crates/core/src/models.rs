use crate::error::ChatError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub filename: String,
    pub text: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: u64,
    pub text: String,
    /// Character offsets into the owning document's text.
    pub char_start: usize,
    pub char_end: usize,
}

impl Chunk {
    pub fn span(&self) -> Range<usize> {
        self.char_start..self.char_end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Chunks for one query, best first. Never longer than the requested `k`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.hits.iter().map(|hit| &hit.chunk)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub grounding: RetrievalResult,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Dense,
    Sparse,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dense => write!(f, "dense"),
            Self::Sparse => write!(f, "sparse"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embedding_model: String,
    pub generation_model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub request_timeout: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            top_k: 4,
            embedding_model: "all-minilm-l6-v2".to_string(),
            generation_model: "gemini-2.0-flash".to_string(),
            api_key: None,
            temperature: 0.3,
            max_output_tokens: 2_048,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl ChatOptions {
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.chunk_size == 0 {
            return Err(ChatError::Configuration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChatError::Configuration(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(ChatError::Configuration(
                "top-k must be at least 1".to_string(),
            ));
        }
        if self.generation_model.trim().is_empty() {
            return Err(ChatError::Configuration(
                "generation model name is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The trimmed API key, or a configuration error when it is absent.
    pub fn require_api_key(&self) -> Result<&str, ChatError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ChatError::Configuration(
                    "missing API key; set GEMINI_API_KEY before asking questions".to_string(),
                )
            })
    }
}
