//! Biomedical Concept Linker
//!
//! Maps free-text mentions ("the flu", "hodgkins disease") to concept ids of a
//! controlled vocabulary by nearest-neighbour search over an embedded
//! dictionary of concept names.
//!
//! # Architecture
//!
//! ```text
//! Dictionary file (CUI||name)
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  DictionaryCache                        │
//! │  embed all names once, persist bincode  │
//! │  → dense (+ sparse) rows, mean vector   │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  RetrievalStrategy                      │
//! │  biosyn:  w·sparse·sparseᵀ + dense·denseᵀ│
//! │  sapbert: dense·denseᵀ (cosine, min-max)│
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  Top-k selection                        │
//! │  partial select, ties → lower index     │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  LinkingSession                         │
//! │  "<category>_nen" links on mentions     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use concept_linker::{EntityLinker, LinkerConfig, TextUnit};
//!
//! let config = LinkerConfig::from_env();
//! let linker = EntityLinker::load(&config, Path::new("ctd_diseases.txt"))?;
//!
//! let mut unit = TextUnit::new("Patients with the flu were excluded.");
//! unit.add_mention(14, 21, "diseases");
//! let mut units = vec![unit];
//! linker.predict(&mut units, "diseases", 5)?;
//! # Ok::<(), concept_linker::LinkerError>(())
//! ```

pub mod bert;
pub mod cache;
pub mod config;
pub mod dictionary;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod hub;
pub mod linker;
pub mod matrix;
pub mod normalize;
pub mod session;
pub mod sparse;
pub mod strategy;
pub mod topk;

pub use bert::{Aggregation, BertEncoder};
pub use cache::{CacheStats, DictionaryCache, DictionaryCacheEntry};
pub use config::LinkerConfig;
pub use dictionary::{ConceptEntry, Dictionary};
pub use encoder::{DenseEncoder, SparseEncoder};
pub use engine::{Candidate, RetrievalEngine};
pub use error::{LinkerError, Result};
pub use fusion::DenseScoring;
pub use linker::EntityLinker;
pub use matrix::{Matrix, ScoreMatrix, SparseMatrix};
pub use normalize::{normalize_mention, TextNormalizer};
pub use session::{LinkedConcept, LinkingSession, Mention, TextUnit};
pub use sparse::{CharNgramEncoder, SparseVocabulary};
pub use strategy::{
    Batching, DenseStrategy, Embeddings, HybridStrategy, RetrievalStrategy, StrategyKind,
};
pub use topk::{select_top_k, TopK, TopKSelector};
