//! Embedding strategies and the startup probe that picks one.
//!
//! A [`EmbeddingStrategy`] turns a chunk list into a [`ChunkIndex`]; the index
//! keeps whatever it needs to project questions into the same vector space.
//! [`probe_strategy`] tries the neural encoder once and falls back to the
//! sparse TF-IDF strategy when it cannot be loaded.

use crate::error::ChatError;
use crate::models::{ChatOptions, Chunk, StrategyKind};
use crate::sparse::{sparse_dot, SparseVector, TfIdfVectorizer, DEFAULT_MAX_FEATURES};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{info, warn};

pub trait TextEncoder: Send + Sync {
    fn model_name(&self) -> &str;
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChatError>;
}

pub trait ChunkIndex: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positions into the indexed chunk list with their similarity, best first,
    /// at most `k` entries. Equal scores keep chunk order.
    fn search(&self, question: &str, k: usize) -> Result<Vec<(usize, f32)>, ChatError>;
}

pub trait EmbeddingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn describe(&self) -> String;
    fn build_index(&self, chunks: &[Chunk]) -> Result<Box<dyn ChunkIndex>, ChatError>;
}

pub struct DenseStrategy {
    encoder: Arc<dyn TextEncoder>,
}

impl DenseStrategy {
    pub fn new(encoder: Arc<dyn TextEncoder>) -> Self {
        Self { encoder }
    }
}

impl EmbeddingStrategy for DenseStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Dense
    }

    fn describe(&self) -> String {
        format!("dense ({})", self.encoder.model_name())
    }

    fn build_index(&self, chunks: &[Chunk]) -> Result<Box<dyn ChunkIndex>, ChatError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let mut vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.encoder.encode(&texts)?
        };

        if vectors.len() != chunks.len() {
            return Err(ChatError::EmbeddingBackendUnavailable(format!(
                "encoder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        for vector in &mut vectors {
            if vector.len() != dimensions {
                return Err(ChatError::EmbeddingBackendUnavailable(format!(
                    "encoder returned mixed dimensions {} and {}",
                    dimensions,
                    vector.len()
                )));
            }
            normalize(vector);
        }

        Ok(Box::new(DenseIndex {
            encoder: Arc::clone(&self.encoder),
            vectors,
            dimensions,
        }))
    }
}

/// Exhaustive inner-product search over unit vectors (cosine similarity).
struct DenseIndex {
    encoder: Arc<dyn TextEncoder>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
}

impl ChunkIndex for DenseIndex {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Dense
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn search(&self, question: &str, k: usize) -> Result<Vec<(usize, f32)>, ChatError> {
        let mut query = self
            .encoder
            .encode(&[question.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ChatError::EmbeddingBackendUnavailable("encoder returned no query vector".to_string())
            })?;

        if query.len() != self.dimensions {
            return Err(ChatError::EmbeddingBackendUnavailable(format!(
                "query vector dim {} is not {}",
                query.len(),
                self.dimensions
            )));
        }
        normalize(&mut query);

        let scores = self
            .vectors
            .iter()
            .map(|vector| dot(vector, &query))
            .enumerate()
            .collect();
        Ok(top_k(scores, k))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SparseStrategy {
    pub max_features: usize,
}

impl Default for SparseStrategy {
    fn default() -> Self {
        Self {
            max_features: DEFAULT_MAX_FEATURES,
        }
    }
}

impl EmbeddingStrategy for SparseStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sparse
    }

    fn describe(&self) -> String {
        format!("sparse (tf-idf, {} features max)", self.max_features)
    }

    fn build_index(&self, chunks: &[Chunk]) -> Result<Box<dyn ChunkIndex>, ChatError> {
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let vectorizer = TfIdfVectorizer::fit(&texts, self.max_features)?;
        let rows = texts.iter().map(|text| vectorizer.transform(text)).collect();
        Ok(Box::new(SparseIndex { vectorizer, rows }))
    }
}

struct SparseIndex {
    vectorizer: TfIdfVectorizer,
    rows: Vec<SparseVector>,
}

impl ChunkIndex for SparseIndex {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sparse
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    /// Chunks with zero similarity are left out, so a question sharing no
    /// feature with the vocabulary yields no hits.
    fn search(&self, question: &str, k: usize) -> Result<Vec<(usize, f32)>, ChatError> {
        let query = self.vectorizer.transform(question);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self
            .rows
            .iter()
            .map(|row| sparse_dot(row, &query))
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        Ok(top_k(scores, k))
    }
}

pub struct StrategySelection {
    pub strategy: Arc<dyn EmbeddingStrategy>,
    /// Set when the neural encoder could not be used and the sparse strategy was chosen.
    pub fallback_reason: Option<String>,
}

impl StrategySelection {
    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Loads the configured neural encoder, or the sparse strategy when that fails.
pub fn probe_strategy(options: &ChatOptions) -> StrategySelection {
    let model = options.embedding_model.clone();
    select_strategy(move || load_neural_encoder(&model))
}

/// Runs `load` once and checks the encoder produces a usable vector. Errors and
/// panics both select the sparse strategy; the reason is logged and returned.
pub fn select_strategy<F>(load: F) -> StrategySelection
where
    F: FnOnce() -> Result<Arc<dyn TextEncoder>, ChatError>,
{
    let probed = catch_unwind(AssertUnwindSafe(|| -> Result<Arc<dyn TextEncoder>, ChatError> {
        let encoder = load()?;
        let sample = encoder.encode(&["capability probe".to_string()])?;
        match sample.first() {
            Some(vector) if !vector.is_empty() => Ok(encoder),
            _ => Err(ChatError::EmbeddingBackendUnavailable(format!(
                "{} produced an empty probe vector",
                encoder.model_name()
            ))),
        }
    }));

    let reason = match probed {
        Ok(Ok(encoder)) => {
            let strategy = DenseStrategy::new(encoder);
            info!(strategy = %strategy.describe(), "embedding strategy selected");
            return StrategySelection {
                strategy: Arc::new(strategy),
                fallback_reason: None,
            };
        }
        Ok(Err(error)) => error.to_string(),
        Err(_) => "embedding backend panicked while loading".to_string(),
    };

    warn!(reason = %reason, "neural embeddings unavailable, falling back to tf-idf");
    StrategySelection {
        strategy: Arc::new(SparseStrategy::default()),
        fallback_reason: Some(reason),
    }
}

#[cfg(feature = "dense-embeddings")]
fn load_neural_encoder(model: &str) -> Result<Arc<dyn TextEncoder>, ChatError> {
    Ok(Arc::new(local::FastEmbedEncoder::load(model)?))
}

#[cfg(not(feature = "dense-embeddings"))]
fn load_neural_encoder(_model: &str) -> Result<Arc<dyn TextEncoder>, ChatError> {
    Err(ChatError::EmbeddingBackendUnavailable(
        "built without the dense-embeddings feature".to_string(),
    ))
}

#[cfg(feature = "dense-embeddings")]
pub mod local {
    use super::TextEncoder;
    use crate::error::ChatError;
    use std::sync::Mutex;

    pub struct FastEmbedEncoder {
        name: String,
        model: Mutex<fastembed::TextEmbedding>,
    }

    impl FastEmbedEncoder {
        pub fn load(name: &str) -> Result<Self, ChatError> {
            let model = fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(
                model_for_name(name)?,
            ))
            .map_err(|error| {
                ChatError::EmbeddingBackendUnavailable(format!("failed to load {name}: {error}"))
            })?;

            Ok(Self {
                name: name.to_string(),
                model: Mutex::new(model),
            })
        }
    }

    impl TextEncoder for FastEmbedEncoder {
        fn model_name(&self) -> &str {
            &self.name
        }

        fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
            let mut model = self.model.lock().map_err(|_| {
                ChatError::EmbeddingBackendUnavailable("embedding model lock poisoned".to_string())
            })?;
            model.embed(texts.to_vec(), None).map_err(|error| {
                ChatError::EmbeddingBackendUnavailable(format!("local embedding failed: {error}"))
            })
        }
    }

    fn model_for_name(name: &str) -> Result<fastembed::EmbeddingModel, ChatError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
            }
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            other => Err(ChatError::Configuration(format!(
                "unknown embedding model: {other}"
            ))),
        }
    }
}

fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

fn top_k(mut scored: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    scored.sort_by(|left, right| right.1.total_cmp(&left.1));
    scored.truncate(k);
    scored
}


#[cfg(test)]
mod tests {
    use super::test_support::TrigramCountEncoder;
    use super::*;
    use crate::chunking::chunk_text;

    struct BrokenEncoder;

    impl TextEncoder for BrokenEncoder {
        fn model_name(&self) -> &str {
            "broken"
        }

        fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ChatError> {
            Ok(vec![Vec::new()])
        }
    }

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .flat_map(|(i, text)| chunk_text(&format!("doc-{i}"), text, 1_000, 0).expect("valid"))
            .collect()
    }

    #[test]
    fn dense_index_normalizes_raw_encoder_output() {
        let strategy = DenseStrategy::new(Arc::new(TrigramCountEncoder { buckets: 32 }));
        let index = strategy
            .build_index(&chunks(&["pump pump pump pump"]))
            .expect("index builds");

        let hits = index.search("pump pump pump pump", 1).expect("search works");
        assert_eq!(hits.len(), 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn dense_index_ranks_closest_chunk_first() {
        let strategy = DenseStrategy::new(Arc::new(TrigramCountEncoder::default()));
        let index = strategy
            .build_index(&chunks(&[
                "the hydraulic pump delivers pressure",
                "lunch menu: soup and bread",
            ]))
            .expect("index builds");

        let hits = index.search("hydraulic pump pressure", 2).expect("search works");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn sparse_index_breaks_ties_by_chunk_order() {
        let index = SparseStrategy::default()
            .build_index(&chunks(&["valve check", "valve check", "unrelated words"]))
            .expect("index builds");

        let hits = index.search("valve", 3).expect("search works");
        assert_eq!(hits.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn sparse_query_without_overlap_is_empty() {
        let index = SparseStrategy::default()
            .build_index(&chunks(&["valve check", "oil level"]))
            .expect("index builds");
        assert!(index.search("zebra", 2).expect("search works").is_empty());
    }

    #[test]
    fn failed_load_selects_sparse_with_reason() {
        let selection = select_strategy(|| {
            Err(ChatError::EmbeddingBackendUnavailable("not installed".to_string()))
        });
        assert_eq!(selection.kind(), StrategyKind::Sparse);
        assert!(selection
            .fallback_reason
            .as_deref()
            .is_some_and(|reason| reason.contains("not installed")));
    }

    #[test]
    fn panicking_load_selects_sparse() {
        let selection = select_strategy(|| panic!("shared library missing"));
        assert_eq!(selection.kind(), StrategyKind::Sparse);
        assert!(selection.is_fallback());
    }

    #[test]
    fn unusable_encoder_selects_sparse() {
        let selection = select_strategy(|| Ok(Arc::new(BrokenEncoder) as Arc<dyn TextEncoder>));
        assert_eq!(selection.kind(), StrategyKind::Sparse);
    }

    #[test]
    fn working_encoder_selects_dense() {
        let selection =
            select_strategy(|| {
                Ok(Arc::new(TrigramCountEncoder::default()) as Arc<dyn TextEncoder>)
            });
        assert_eq!(selection.kind(), StrategyKind::Dense);
        assert!(!selection.is_fallback());
    }
}
