use crate::embeddings::{ChunkIndex, EmbeddingStrategy};
use crate::error::ChatError;
use crate::models::{Chunk, RetrievalResult, ScoredChunk, StrategyKind};
use std::sync::Arc;
use tracing::{debug, info};

struct IndexedCorpus {
    chunks: Vec<Chunk>,
    index: Box<dyn ChunkIndex>,
}

/// Top-k retrieval over the chunks of the current document set.
///
/// The strategy is fixed at construction; every index this retriever builds
/// comes from it, so stored vectors and query vectors share one space.
pub struct Retriever {
    strategy: Arc<dyn EmbeddingStrategy>,
    corpus: Option<IndexedCorpus>,
}

impl Retriever {
    pub fn new(strategy: Arc<dyn EmbeddingStrategy>) -> Self {
        Self {
            strategy,
            corpus: None,
        }
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn describe_strategy(&self) -> String {
        self.strategy.describe()
    }

    pub fn chunk_count(&self) -> usize {
        self.corpus.as_ref().map_or(0, |corpus| corpus.chunks.len())
    }

    pub fn chunks(&self) -> &[Chunk] {
        self.corpus
            .as_ref()
            .map_or(&[][..], |corpus| corpus.chunks.as_slice())
    }

    /// Replaces the index with one built over `chunks`. The previous index
    /// stays in place if building fails.
    pub fn rebuild(&mut self, chunks: Vec<Chunk>) -> Result<usize, ChatError> {
        if chunks.is_empty() {
            self.corpus = None;
            return Ok(0);
        }

        let index = self.strategy.build_index(&chunks)?;
        if index.kind() != self.strategy.kind() || index.len() != chunks.len() {
            return Err(ChatError::EmbeddingBackendUnavailable(format!(
                "{} index holds {} vectors for {} chunks",
                index.kind(),
                index.len(),
                chunks.len()
            )));
        }

        info!(
            strategy = %self.strategy.kind(),
            chunk_count = chunks.len(),
            "retrieval index rebuilt"
        );
        let count = chunks.len();
        self.corpus = Some(IndexedCorpus { chunks, index });
        Ok(count)
    }

    pub fn clear(&mut self) {
        self.corpus = None;
    }

    /// `k` is clamped to `[1, chunk_count]`.
    pub fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult, ChatError> {
        let corpus = self.corpus.as_ref().ok_or(ChatError::EmptyIndex)?;

        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::InvalidQuery(
                "enter a question before searching".to_string(),
            ));
        }

        let k = k.clamp(1, corpus.chunks.len());
        let ranked = corpus.index.search(question, k)?;
        debug!(k, hits = ranked.len(), "retrieved chunks");

        let hits = ranked
            .into_iter()
            .take(k)
            .filter_map(|(position, score)| {
                corpus.chunks.get(position).map(|chunk| ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect();

        Ok(RetrievalResult { hits })
    }
}
