//! Retrieval strategies
//!
//! Both strategies share one contract: embed names (dense, and sparse when the
//! strategy has a sparse encoder) and turn query/dictionary embeddings into a
//! score matrix. Candidate selection is shared and lives in
//! [`crate::engine`].
//!
//! - [`HybridStrategy`] (BioSyn): `w · sparse·sparseᵀ + dense·denseᵀ`, with
//!   `w` learned and shipped next to the model weights.
//! - [`DenseStrategy`] (SapBERT): dense dot product, optionally cosine and
//!   optionally min-max normalized.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bert::{Aggregation, BertEncoder};
use crate::encoder::{
    embed_dense_batched, embed_sparse_batched, DenseEncoder, SparseEncoder, DEFAULT_BATCH_SIZE,
};
use crate::error::{LinkerError, Result};
use crate::fusion::{fuse_hybrid, DenseScoring};
use crate::hub::{model_file, resolve_biosyn_name, resolve_sapbert_name};
use crate::matrix::{Matrix, ScoreMatrix, SparseMatrix};
use crate::sparse::{CharNgramEncoder, SPARSE_ENCODER_FILE};

/// Learned sparse weight stored as a bare JSON number
pub const SPARSE_WEIGHT_JSON: &str = "sparse_weight.json";

/// Learned sparse weight stored as a PyTorch tensor
pub const SPARSE_WEIGHT_PT: &str = "sparse_weight.pt";

/// Which retrieval strategy to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Sparse + dense (BioSyn)
    #[serde(rename = "biosyn")]
    Hybrid,
    /// Dense only (SapBERT)
    #[serde(rename = "sapbert")]
    Dense,
}

impl FromStr for StrategyKind {
    type Err = LinkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "biosyn" => Ok(StrategyKind::Hybrid),
            "sapbert" => Ok(StrategyKind::Dense),
            _ => Err(LinkerError::UnsupportedStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Hybrid => write!(f, "biosyn"),
            StrategyKind::Dense => write!(f, "sapbert"),
        }
    }
}

impl StrategyKind {
    /// Expand model shorthands for this strategy
    pub fn resolve_model_name(&self, model_name: &str) -> String {
        match self {
            StrategyKind::Hybrid => resolve_biosyn_name(model_name),
            StrategyKind::Dense => resolve_sapbert_name(model_name),
        }
    }
}

/// Batch sizes for embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batching {
    pub dense: usize,
    pub sparse: usize,
}

impl Default for Batching {
    fn default() -> Self {
        Self {
            dense: DEFAULT_BATCH_SIZE,
            sparse: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Embeddings of a batch of names, rows aligned with the input order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embeddings {
    pub dense: Matrix,
    pub sparse: Option<SparseMatrix>,
}

impl Embeddings {
    pub fn rows(&self) -> usize {
        self.dense.rows()
    }
}

/// Shared contract of the retrieval strategies
pub trait RetrievalStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Encoder identity used in dictionary cache keys
    fn identifier(&self) -> &str {
        self.dense_encoder().identifier()
    }

    fn dense_encoder(&self) -> &dyn DenseEncoder;

    /// `None` for dense-only strategies
    fn sparse_encoder(&self) -> Option<&dyn SparseEncoder>;

    fn uses_sparse(&self) -> bool {
        self.sparse_encoder().is_some()
    }

    /// Score every query row against every dictionary row
    fn score(&self, query: &Embeddings, dictionary: &Embeddings) -> Result<ScoreMatrix>;

    /// Embed names through every encoder this strategy uses
    fn embed(&self, names: &[&str], batching: Batching) -> Result<Embeddings> {
        let sparse = match self.sparse_encoder() {
            Some(encoder) => Some(embed_sparse_batched(encoder, names, batching.sparse)?),
            None => None,
        };
        let dense = embed_dense_batched(self.dense_encoder(), names, batching.dense)?;
        Ok(Embeddings { dense, sparse })
    }
}

/// BioSyn-style sparse + dense retrieval
pub struct HybridStrategy {
    dense: Box<dyn DenseEncoder>,
    sparse: Box<dyn SparseEncoder>,
    sparse_weight: f32,
}

impl HybridStrategy {
    pub fn new(
        dense: Box<dyn DenseEncoder>,
        sparse: Box<dyn SparseEncoder>,
        sparse_weight: f32,
    ) -> Self {
        Self {
            dense,
            sparse,
            sparse_weight,
        }
    }

    /// Load dense encoder, sparse vocabulary and sparse weight of one model
    pub fn load(
        model_name_or_path: &str,
        max_length: usize,
        aggregation: Aggregation,
    ) -> Result<Self> {
        let dense = BertEncoder::load(model_name_or_path, max_length, aggregation)?;
        let sparse =
            CharNgramEncoder::load(&model_file(model_name_or_path, SPARSE_ENCODER_FILE)?)?;
        let sparse_weight = load_sparse_weight(model_name_or_path)?;
        info!(model = model_name_or_path, sparse_weight, "Hybrid strategy ready");
        Ok(Self::new(Box::new(dense), Box::new(sparse), sparse_weight))
    }

    pub fn sparse_weight(&self) -> f32 {
        self.sparse_weight
    }
}

impl RetrievalStrategy for HybridStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hybrid
    }

    fn dense_encoder(&self) -> &dyn DenseEncoder {
        self.dense.as_ref()
    }

    fn sparse_encoder(&self) -> Option<&dyn SparseEncoder> {
        Some(self.sparse.as_ref())
    }

    fn score(&self, query: &Embeddings, dictionary: &Embeddings) -> Result<ScoreMatrix> {
        let (Some(query_sparse), Some(dict_sparse)) = (&query.sparse, &dictionary.sparse) else {
            return Err(LinkerError::Config(
                "hybrid scoring needs sparse embeddings for queries and dictionary".to_string(),
            ));
        };
        let sparse_scores = query_sparse.dot_transposed(dict_sparse)?;
        let dense_scores = query.dense.dot_transposed(&dictionary.dense)?;
        fuse_hybrid(&sparse_scores, &dense_scores, self.sparse_weight)
    }
}

/// SapBERT-style dense-only retrieval
pub struct DenseStrategy {
    dense: Box<dyn DenseEncoder>,
    scoring: DenseScoring,
}

impl DenseStrategy {
    pub fn new(dense: Box<dyn DenseEncoder>, scoring: DenseScoring) -> Self {
        Self { dense, scoring }
    }

    pub fn load(
        model_name_or_path: &str,
        max_length: usize,
        aggregation: Aggregation,
        scoring: DenseScoring,
    ) -> Result<Self> {
        let dense = BertEncoder::load(model_name_or_path, max_length, aggregation)?;
        info!(model = model_name_or_path, ?scoring, "Dense strategy ready");
        Ok(Self::new(Box::new(dense), scoring))
    }

    pub fn scoring(&self) -> DenseScoring {
        self.scoring
    }
}

impl RetrievalStrategy for DenseStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Dense
    }

    fn dense_encoder(&self) -> &dyn DenseEncoder {
        self.dense.as_ref()
    }

    fn sparse_encoder(&self) -> Option<&dyn SparseEncoder> {
        None
    }

    fn score(&self, query: &Embeddings, dictionary: &Embeddings) -> Result<ScoreMatrix> {
        self.scoring.score(&query.dense, &dictionary.dense)
    }
}

/// Read the learned sparse weight of a BioSyn model
///
/// A local `sparse_weight.json` (a bare number) wins; otherwise the
/// PyTorch `sparse_weight.pt` is read through Candle's pickle loader.
pub fn load_sparse_weight(model_name_or_path: &str) -> Result<f32> {
    let local_json = Path::new(model_name_or_path).join(SPARSE_WEIGHT_JSON);
    if local_json.is_file() {
        let text = std::fs::read_to_string(&local_json).map_err(|e| {
            LinkerError::EncoderUnavailable(format!("Failed to read {}: {e}", local_json.display()))
        })?;
        return parse_sparse_weight(&text).ok_or_else(|| {
            LinkerError::EncoderUnavailable(format!(
                "{} does not contain a number",
                local_json.display()
            ))
        });
    }

    let path = model_file(model_name_or_path, SPARSE_WEIGHT_PT)?;
    let tensors = candle_core::pickle::read_all(&path).map_err(|e| {
        LinkerError::EncoderUnavailable(format!("Failed to read {}: {e}", path.display()))
    })?;
    let (_, tensor) = tensors.into_iter().next().ok_or_else(|| {
        LinkerError::EncoderUnavailable(format!(
            "{} holds no tensor; provide {SPARSE_WEIGHT_JSON} instead",
            path.display()
        ))
    })?;
    let values = tensor
        .flatten_all()
        .and_then(|t| t.to_dtype(candle_core::DType::F32))
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(|e| {
            LinkerError::EncoderUnavailable(format!("Invalid sparse weight tensor: {e}"))
        })?;
    values.first().copied().ok_or_else(|| {
        LinkerError::EncoderUnavailable(format!("{} is an empty tensor", path.display()))
    })
}

fn parse_sparse_weight(text: &str) -> Option<f32> {
    serde_json::from_str::<f32>(text.trim()).ok()
}
