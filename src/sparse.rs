//! Character n-gram TF-IDF encoder
//!
//! The sparse half of hybrid retrieval. Features are the character 1- and
//! 2-grams of the lowercased text (whitespace runs collapsed to one space).
//! The fitted vocabulary is sorted lexicographically, so feature indices are
//! stable across fit/save/load. Weights are raw counts times a smoothed idf
//! `ln((1 + n) / (1 + df)) + 1`, and each row is L2 normalized.
//!
//! The vocabulary must travel with the encoder: an encoder refit on a
//! different corpus produces vectors of a different width.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::encoder::SparseEncoder;
use crate::error::{LinkerError, Result};
use crate::matrix::SparseMatrix;

/// File name of a persisted vocabulary inside a model directory
pub const SPARSE_ENCODER_FILE: &str = "sparse_encoder.json";

static WHITE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\s+").expect("static regex"));

/// Fitted character n-gram vocabulary with idf weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVocabulary {
    /// Inclusive n-gram length range
    pub ngram_range: (usize, usize),
    /// Features in index order (sorted)
    pub features: Vec<String>,
    /// Inverse document frequency per feature
    pub idf: Vec<f32>,
}

/// TF-IDF encoder over a fitted [`SparseVocabulary`]
#[derive(Debug, Clone)]
pub struct CharNgramEncoder {
    vocabulary: SparseVocabulary,
    index: HashMap<String, u32>,
}

impl CharNgramEncoder {
    /// Fit a vocabulary on `corpus` with 1- and 2-grams
    pub fn fit<S: AsRef<str>>(corpus: &[S]) -> Self {
        Self::fit_with_range(corpus, (1, 2))
    }

    pub fn fit_with_range<S: AsRef<str>>(corpus: &[S], ngram_range: (usize, usize)) -> Self {
        let mut document_frequency: BTreeMap<String, usize> = BTreeMap::new();
        for doc in corpus {
            let mut seen: Vec<String> = char_ngrams(doc.as_ref(), ngram_range);
            seen.sort_unstable();
            seen.dedup();
            for gram in seen {
                *document_frequency.entry(gram).or_insert(0) += 1;
            }
        }

        let n_docs = corpus.len() as f64;
        let (features, idf): (Vec<String>, Vec<f32>) = document_frequency
            .into_iter()
            .map(|(gram, df)| {
                let idf = ((1.0 + n_docs) / (1.0 + df as f64)).ln() + 1.0;
                (gram, idf as f32)
            })
            .unzip();

        info!(
            documents = corpus.len(),
            features = features.len(),
            "Fitted character n-gram vocabulary"
        );

        Self::from_vocabulary(SparseVocabulary {
            ngram_range,
            features,
            idf,
        })
    }

    pub fn from_vocabulary(vocabulary: SparseVocabulary) -> Self {
        let index = vocabulary
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), i as u32))
            .collect();
        Self { vocabulary, index }
    }

    pub fn vocabulary(&self) -> &SparseVocabulary {
        &self.vocabulary
    }

    /// Encode texts as L2-normalized TF-IDF rows. Unknown n-grams are ignored.
    pub fn transform<S: AsRef<str>>(&self, texts: &[S]) -> SparseMatrix {
        let mut out = SparseMatrix::new(self.vocabulary.features.len());
        for text in texts {
            let mut counts: BTreeMap<u32, f32> = BTreeMap::new();
            for gram in char_ngrams(text.as_ref(), self.vocabulary.ngram_range) {
                if let Some(&idx) = self.index.get(&gram) {
                    *counts.entry(idx).or_insert(0.0) += 1.0;
                }
            }
            let weighted: Vec<(u32, f32)> = counts
                .into_iter()
                .map(|(idx, tf)| (idx, tf * self.vocabulary.idf[idx as usize]))
                .collect();
            let norm = weighted.iter().map(|(_, v)| v * v).sum::<f32>().sqrt();
            out.push_row(weighted.into_iter().map(|(idx, v)| {
                if norm > 0.0 {
                    (idx, v / norm)
                } else {
                    (idx, v)
                }
            }));
        }
        out
    }

    /// Persist the vocabulary as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LinkerError::CacheWrite {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_vec(&self.vocabulary)
            .map_err(|e| LinkerError::Encoder(format!("Failed to serialize vocabulary: {e}")))?;
        std::fs::write(path, json).map_err(|source| LinkerError::CacheWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Sparse encoder saved");
        Ok(())
    }

    /// Load a vocabulary written by [`CharNgramEncoder::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            LinkerError::EncoderUnavailable(format!(
                "Failed to read sparse encoder {}: {e}",
                path.display()
            ))
        })?;
        let vocabulary: SparseVocabulary = serde_json::from_slice(&bytes).map_err(|e| {
            LinkerError::EncoderUnavailable(format!(
                "Failed to parse sparse encoder {}: {e}",
                path.display()
            ))
        })?;
        if vocabulary.features.len() != vocabulary.idf.len() {
            return Err(LinkerError::EncoderUnavailable(format!(
                "Sparse encoder {} has {} features but {} idf weights",
                path.display(),
                vocabulary.features.len(),
                vocabulary.idf.len()
            )));
        }
        info!(
            path = %path.display(),
            features = vocabulary.features.len(),
            "Sparse encoder loaded"
        );
        Ok(Self::from_vocabulary(vocabulary))
    }
}

impl SparseEncoder for CharNgramEncoder {
    fn embed_sparse(&self, texts: &[&str]) -> Result<SparseMatrix> {
        Ok(self.transform(texts))
    }

    fn dimension(&self) -> usize {
        self.vocabulary.features.len()
    }
}

/// Character n-grams of the lowercased, whitespace-collapsed text
fn char_ngrams(text: &str, (min_n, max_n): (usize, usize)) -> Vec<String> {
    let lowered = text.to_lowercase();
    let collapsed = WHITE_SPACES.replace_all(&lowered, " ");
    let chars: Vec<char> = collapsed.chars().collect();

    let mut grams = Vec::new();
    for n in min_n.max(1)..=max_n.min(chars.len()) {
        grams.extend(chars.windows(n).map(|w| w.iter().collect::<String>()));
    }
    grams
}
