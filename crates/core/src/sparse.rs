//! Term-frequency vectors weighted by smoothed inverse document frequency.
//!
//! Features are lowercased word unigrams and bigrams. Tokens are matches of
//! [`TOKEN_PATTERN`] on the lowercased text, so combining marks and connector
//! punctuation stay inside a word. Rows are L2-normalized, so a dot product
//! between two rows is their cosine similarity.

use crate::error::ChatError;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

pub const DEFAULT_MAX_FEATURES: usize = 4_096;

/// Two or more Unicode word characters between word boundaries.
pub const TOKEN_PATTERN: &str = r"(?u)\b\w\w+\b";

/// Non-zero entries as `(feature index, weight)`, sorted by index.
pub type SparseVector = Vec<(usize, f32)>;

#[derive(Debug, Clone)]
pub struct TfIdfVectorizer {
    pattern: Regex,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
}

impl TfIdfVectorizer {
    /// Learns the vocabulary and document frequencies of `texts`.
    ///
    /// When more than `max_features` distinct features exist, the ones with the
    /// highest corpus frequency are kept (ties go to the lexically smaller one).
    pub fn fit<S: AsRef<str>>(texts: &[S], max_features: usize) -> Result<Self, ChatError> {
        let pattern = token_pattern()?;
        let mut corpus_counts: HashMap<String, usize> = HashMap::new();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let features = features(&pattern, text.as_ref());
            let mut seen = HashSet::new();
            for feature in features {
                if seen.insert(feature.clone()) {
                    *document_frequency.entry(feature.clone()).or_default() += 1;
                }
                *corpus_counts.entry(feature).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = corpus_counts.into_iter().collect();
        ranked.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
        ranked.truncate(max_features);

        let mut kept: Vec<String> = ranked.into_iter().map(|(term, _)| term).collect();
        kept.sort_unstable();

        let documents = texts.len() as f32;
        let mut vocabulary = HashMap::with_capacity(kept.len());
        let mut idf = Vec::with_capacity(kept.len());
        for (index, term) in kept.into_iter().enumerate() {
            let df = document_frequency.get(&term).copied().unwrap_or(0) as f32;
            idf.push(((1.0 + documents) / (1.0 + df)).ln() + 1.0);
            vocabulary.insert(term, index);
        }

        Ok(Self {
            pattern,
            vocabulary,
            idf,
        })
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.vocabulary.contains_key(feature)
    }

    /// Projects `text` onto the fitted vocabulary. Unknown features are dropped,
    /// so text without any known feature maps to an empty vector.
    pub fn transform(&self, text: &str) -> SparseVector {
        let mut counts: BTreeMap<usize, f32> = BTreeMap::new();
        for feature in features(&self.pattern, text) {
            if let Some(&index) = self.vocabulary.get(&feature) {
                *counts.entry(index).or_default() += 1.0;
            }
        }

        let mut vector: SparseVector = counts
            .into_iter()
            .map(|(index, tf)| (index, tf * self.idf[index]))
            .collect();

        let norm = vector.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, weight) in &mut vector {
                *weight /= norm;
            }
        }
        vector
    }
}

fn token_pattern() -> Result<Regex, ChatError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern.clone());
    }
    let compiled = Regex::new(TOKEN_PATTERN)?;
    Ok(PATTERN.get_or_init(|| compiled).clone())
}

pub fn tokenize(text: &str) -> Result<Vec<String>, ChatError> {
    Ok(tokens(&token_pattern()?, text))
}

fn tokens(pattern: &Regex, text: &str) -> Vec<String> {
    pattern
        .find_iter(&text.to_lowercase())
        .map(|token| token.as_str().to_string())
        .collect()
}

fn features(pattern: &Regex, text: &str) -> Vec<String> {
    let tokens = tokens(pattern, text);
    let bigrams = tokens
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect::<Vec<_>>();
    let mut all = tokens;
    all.extend(bigrams);
    all
}

/// Dot product of two index-sorted sparse vectors.
pub fn sparse_dot(left: &[(usize, f32)], right: &[(usize, f32)]) -> f32 {
    let (mut i, mut j) = (0, 0);
    let mut total = 0.0;
    while i < left.len() && j < right.len() {
        match left[i].0.cmp(&right[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                total += left[i].1 * right[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_drops_single_characters_and_punctuation() {
        assert_eq!(
            tokenize("A pump's flow-rate is 5 L/min.").expect("pattern compiles"),
            vec!["pump", "flow", "rate", "is", "min"]
        );
    }

    #[test]
    fn tokenizer_keeps_combining_marks_and_connectors_inside_words() {
        assert_eq!(
            tokenize("Re\u{301}sume\u{301} a\u{2040}b snake_case").expect("pattern compiles"),
            vec!["re\u{301}sume\u{301}", "a\u{2040}b", "snake_case"]
        );
    }

    #[test]
    fn decomposed_text_matches_its_own_vocabulary() {
        let vectorizer =
            TfIdfVectorizer::fit(&["re\u{301}sume\u{301} review"], DEFAULT_MAX_FEATURES)
                .expect("fits");
        assert!(vectorizer.contains("re\u{301}sume\u{301}"));
        assert!(!vectorizer.contains("sume"));
        assert_eq!(vectorizer.transform("RE\u{301}SUME\u{301}").len(), 1);
    }

    #[test]
    fn vocabulary_contains_unigrams_and_bigrams() {
        let vectorizer =
            TfIdfVectorizer::fit(&["hydraulic pump pressure"], DEFAULT_MAX_FEATURES).expect("fits");
        assert_eq!(vectorizer.vocabulary_len(), 5);
        assert!(vectorizer.contains("hydraulic pump"));
        assert!(vectorizer.contains("pressure"));
    }

    #[test]
    fn max_features_keeps_most_frequent_terms() {
        let vectorizer =
            TfIdfVectorizer::fit(&["alpha alpha alpha beta beta gamma"], 2).expect("fits");
        assert_eq!(vectorizer.vocabulary_len(), 2);
        assert!(vectorizer.contains("alpha"));
        assert!(vectorizer.contains("alpha alpha"));
        assert!(!vectorizer.contains("gamma"));
    }

    #[test]
    fn rows_are_unit_length() {
        let vectorizer = TfIdfVectorizer::fit(
            &["oil filter change", "oil pressure warning"],
            DEFAULT_MAX_FEATURES,
        )
        .expect("fits");
        let row = vectorizer.transform("oil filter change");
        let self_similarity = sparse_dot(&row, &row);
        assert!((self_similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn unknown_terms_produce_an_empty_vector() {
        let vectorizer =
            TfIdfVectorizer::fit(&["oil filter change"], DEFAULT_MAX_FEATURES).expect("fits");
        assert!(vectorizer.transform("quantum chromodynamics").is_empty());
    }

    #[test]
    fn rare_terms_weigh_more_than_common_ones() {
        let vectorizer = TfIdfVectorizer::fit(
            &["oil filter", "oil pressure", "oil temperature"],
            DEFAULT_MAX_FEATURES,
        )
        .expect("fits");
        let row = vectorizer.transform("oil filter");
        let weights: Vec<f32> = row.iter().map(|(_, w)| *w).collect();
        // "filter" and "oil filter" share idf; both outweigh "oil".
        let min = weights.iter().copied().fold(f32::INFINITY, f32::min);
        let max = weights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert!(max > min);
    }
}
