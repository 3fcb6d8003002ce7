//! Candidate retrieval over a cached dictionary
//!
//! ```text
//! mentions ─► embed ─► center ─► score ─► top-k ─► Candidate
//!                       ▲           ▲
//!             mean vector           cached dictionary embeddings
//! ```
//!
//! Queries are processed in chunks of `chunk_rows` mentions so that only one
//! `chunk × dictionary` score block is alive at a time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::DictionaryCacheEntry;
use crate::error::{LinkerError, Result};
use crate::strategy::{Batching, RetrievalStrategy};
use crate::topk::{select_rows, validate_k, TopK};

/// Default number of query rows scored at once
pub const DEFAULT_CHUNK_ROWS: usize = 128;

/// A dictionary entry retrieved for a mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub id: String,
    pub score: f32,
}

/// Retrieval engine binding a strategy to its dictionary cache entry
pub struct RetrievalEngine {
    strategy: Arc<dyn RetrievalStrategy>,
    entry: Arc<DictionaryCacheEntry>,
    batching: Batching,
    chunk_rows: usize,
}

impl RetrievalEngine {
    pub fn new(strategy: Arc<dyn RetrievalStrategy>, entry: Arc<DictionaryCacheEntry>) -> Self {
        Self {
            strategy,
            entry,
            batching: Batching::default(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }

    pub fn with_batching(mut self, batching: Batching) -> Self {
        self.batching = batching;
        self
    }

    /// Query rows per scored block (values below 1 are treated as 1)
    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    pub fn strategy(&self) -> &dyn RetrievalStrategy {
        self.strategy.as_ref()
    }

    pub fn entry(&self) -> &DictionaryCacheEntry {
        &self.entry
    }

    pub fn dictionary_size(&self) -> usize {
        self.entry.len()
    }

    /// Top `k` dictionary entries for one mention, best first
    ///
    /// `k` larger than the dictionary is clamped to its size.
    pub fn predict(&self, mention: &str, k: usize) -> Result<Vec<Candidate>> {
        Ok(self
            .predict_batch(&[mention], k)?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    /// [`RetrievalEngine::predict`] for many mentions, in input order
    pub fn predict_batch(&self, mentions: &[&str], k: usize) -> Result<Vec<Vec<Candidate>>> {
        let available = self.dictionary_size();
        if k == 0 {
            return Err(LinkerError::InvalidK { k, available });
        }
        if available == 0 {
            return Ok(vec![Vec::new(); mentions.len()]);
        }
        let k = k.min(available);
        validate_k(k, available)?;

        let mut results = Vec::with_capacity(mentions.len());
        for (chunk_idx, chunk) in mentions.chunks(self.chunk_rows).enumerate() {
            let mut query = self.strategy.embed(chunk, self.batching)?;
            if let Some(mean) = self.entry.mean_vector() {
                query.dense.subtract_row(mean)?;
            }

            let scores = self.strategy.score(&query, self.entry.embeddings())?;
            let expected = (chunk.len(), available);
            if scores.shape() != expected {
                return Err(LinkerError::ShapeMismatch {
                    expected,
                    found: scores.shape(),
                });
            }

            let top = select_rows(&scores, 0..chunk.len(), k);
            debug!(chunk = chunk_idx, rows = chunk.len(), k, "Scored query chunk");
            results.extend(self.to_candidates(&top));
        }
        Ok(results)
    }

    fn to_candidates(&self, top: &TopK) -> Vec<Vec<Candidate>> {
        let dictionary = self.entry.dictionary();
        (0..top.rows())
            .map(|i| {
                top.indices(i)
                    .iter()
                    .zip(top.scores(i))
                    .filter_map(|(&idx, &score)| {
                        dictionary.get(idx).map(|entry| Candidate {
                            name: entry.name.clone(),
                            id: entry.id.clone(),
                            score,
                        })
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::build_entry;
    use crate::dictionary::{ConceptEntry, Dictionary};
    use crate::encoder::testing::TableEncoder;
    use crate::encoder::DenseEncoder;
    use crate::fusion::DenseScoring;
    use crate::sparse::CharNgramEncoder;
    use crate::strategy::{DenseStrategy, HybridStrategy};

    fn dictionary() -> Dictionary {
        Dictionary::from_entries(vec![
            ConceptEntry::new("flu", "C1"),
            ConceptEntry::new("influenza", "C1"),
            ConceptEntry::new("common cold", "C2"),
            ConceptEntry::new("cold", "C2"),
        ])
    }

    fn table() -> TableEncoder {
        TableEncoder::new(
            "table",
            &[
                ("flu", vec![1.0, 0.0, 0.0]),
                ("influenza", vec![0.9, 0.1, 0.0]),
                ("common cold", vec![0.0, 0.8, 0.2]),
                ("cold", vec![0.0, 1.0, 0.0]),
                ("grippe", vec![0.95, 0.05, 0.0]),
                ("chill", vec![0.0, 0.9, 0.1]),
            ],
        )
    }

    fn dense_engine(mean_centering: bool) -> RetrievalEngine {
        let strategy: Arc<dyn RetrievalStrategy> =
            Arc::new(DenseStrategy::new(Box::new(table()), DenseScoring::default()));
        let entry =
            build_entry(dictionary(), strategy.as_ref(), Batching::default(), mean_centering)
                .unwrap();
        RetrievalEngine::new(strategy, Arc::new(entry))
    }

    #[test]
    fn test_predict_best_first() {
        let engine = dense_engine(false);
        let candidates = engine.predict("grippe", 2).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "flu");
        assert_eq!(candidates[0].id, "C1");
        assert_eq!(candidates[1].name, "influenza");
        assert!(candidates[0].score >= candidates[1].score);
    }

    #[test]
    fn test_k_clamped_to_dictionary_size() {
        let engine = dense_engine(false);
        assert_eq!(engine.predict("flu", 50).unwrap().len(), 4);
    }

    #[test]
    fn test_zero_k_rejected() {
        let engine = dense_engine(false);
        assert!(matches!(
            engine.predict("flu", 0),
            Err(LinkerError::InvalidK { k: 0, available: 4 })
        ));
    }

    #[test]
    fn test_batch_matches_single_predictions() {
        let engine = dense_engine(false).with_chunk_rows(2);
        let mentions = ["grippe", "chill", "flu", "unknown", "cold"];
        let batch = engine.predict_batch(&mentions, 3).unwrap();
        assert_eq!(batch.len(), mentions.len());
        for (mention, candidates) in mentions.iter().zip(&batch) {
            assert_eq!(&engine.predict(mention, 3).unwrap(), candidates);
        }
    }

    #[test]
    fn test_mean_centering_applied_to_queries() {
        let engine = dense_engine(true);
        let mean = engine.entry().mean_vector().unwrap().to_vec();

        let mut query = table().embed_dense(&["grippe"]).unwrap();
        query.subtract_row(&mean).unwrap();
        let expected: f32 = query
            .row(0)
            .iter()
            .zip(engine.entry().dense_embeddings().row(0))
            .map(|(q, d)| q * d)
            .sum();

        let candidates = engine.predict("grippe", 4).unwrap();
        let flu = candidates.iter().find(|c| c.name == "flu").unwrap();
        assert!((flu.score - expected).abs() < 1e-6);
    }

    #[test]
    fn test_empty_dictionary_returns_no_candidates() {
        let strategy: Arc<dyn RetrievalStrategy> =
            Arc::new(DenseStrategy::new(Box::new(table()), DenseScoring::default()));
        let entry = build_entry(
            Dictionary::default(),
            strategy.as_ref(),
            Batching::default(),
            false,
        )
        .unwrap();
        let engine = RetrievalEngine::new(strategy, Arc::new(entry));
        let results = engine.predict_batch(&["flu", "cold"], 5).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_hybrid_engine_prefers_surface_overlap() {
        let dict = dictionary();
        let sparse = CharNgramEncoder::fit(&dict.names());
        // identical dense vectors leave the sparse part to decide
        let flat = TableEncoder::new(
            "flat",
            &[
                ("flu", vec![1.0]),
                ("influenza", vec![1.0]),
                ("common cold", vec![1.0]),
                ("cold", vec![1.0]),
                ("colds", vec![1.0]),
            ],
        );
        let strategy: Arc<dyn RetrievalStrategy> =
            Arc::new(HybridStrategy::new(Box::new(flat), Box::new(sparse), 1.0));
        let entry = build_entry(dict, strategy.as_ref(), Batching::default(), false).unwrap();
        let engine = RetrievalEngine::new(strategy, Arc::new(entry));

        let candidates = engine.predict("colds", 1).unwrap();
        assert_eq!(candidates[0].name, "cold");
    }
}
