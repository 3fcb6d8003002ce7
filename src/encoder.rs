//! Embedding provider boundary
//!
//! Encoders are opaque `text -> vector` functions. The core only relies on
//! two properties: a fixed output width per encoder instance, and
//! deterministic output (inference mode, no sampling). Batch size is a
//! throughput knob and never changes values.

use tracing::debug;

use crate::error::{LinkerError, Result};
use crate::matrix::{Matrix, SparseMatrix};

/// Batch size for CPU-bound encoding of the dictionary
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Dense text encoder (e.g. a BERT `[CLS]` embedder)
pub trait DenseEncoder: Send + Sync {
    /// Stable identifier used in cache keys (model name or path)
    fn identifier(&self) -> &str;

    /// Embed a batch of texts, one row per text in input order
    fn embed_dense(&self, texts: &[&str]) -> Result<Matrix>;

    /// Output width
    fn dimension(&self) -> usize;
}

/// Sparse text encoder over a fixed feature vocabulary
pub trait SparseEncoder: Send + Sync {
    /// Embed a batch of texts, one row per text in input order
    fn embed_sparse(&self, texts: &[&str]) -> Result<SparseMatrix>;

    /// Vocabulary width
    fn dimension(&self) -> usize;
}

/// Embed `texts` in fixed-size batches and concatenate in input order
pub fn embed_dense_batched(
    encoder: &dyn DenseEncoder,
    texts: &[&str],
    batch_size: usize,
) -> Result<Matrix> {
    check_batch_size(batch_size)?;
    if texts.is_empty() {
        return Ok(Matrix::zeros(0, encoder.dimension()));
    }

    let total = texts.len().div_ceil(batch_size);
    let mut parts = Vec::with_capacity(total);
    for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
        let embedded = encoder.embed_dense(batch)?;
        if embedded.rows() != batch.len() {
            return Err(LinkerError::ShapeMismatch {
                expected: (batch.len(), encoder.dimension()),
                found: embedded.shape(),
            });
        }
        debug!(batch = batch_idx + 1, total, rows = batch.len(), "Embedded dense batch");
        parts.push(embedded);
    }
    Matrix::vstack(&parts)
}

/// Sparse counterpart of [`embed_dense_batched`]
pub fn embed_sparse_batched(
    encoder: &dyn SparseEncoder,
    texts: &[&str],
    batch_size: usize,
) -> Result<SparseMatrix> {
    check_batch_size(batch_size)?;
    if texts.is_empty() {
        return Ok(SparseMatrix::new(encoder.dimension()));
    }

    let total = texts.len().div_ceil(batch_size);
    let mut parts = Vec::with_capacity(total);
    for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
        let embedded = encoder.embed_sparse(batch)?;
        if embedded.rows() != batch.len() {
            return Err(LinkerError::ShapeMismatch {
                expected: (batch.len(), encoder.dimension()),
                found: embedded.shape(),
            });
        }
        debug!(batch = batch_idx + 1, total, rows = batch.len(), "Embedded sparse batch");
        parts.push(embedded);
    }
    SparseMatrix::vstack(&parts)
}

fn check_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(LinkerError::Config("batch size must be positive".to_string()));
    }
    Ok(())
}
