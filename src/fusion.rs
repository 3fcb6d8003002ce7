//! Score fusion
//!
//! Combines per-source score matrices into one similarity score per
//! (query, candidate) pair. The hybrid strategy uses a weighted sum of the
//! sparse and dense dot-product scores; the dense-only strategy passes its
//! single source through, optionally as cosine similarity and optionally
//! min-max normalized.

use crate::error::{LinkerError, Result};
use crate::matrix::{Matrix, ScoreMatrix};

/// Weight of the dense source in hybrid scoring. Only the sparse weight is learned.
pub const DENSE_WEIGHT: f32 = 1.0;

/// Weighted sum of score matrices: `Σ weight_i * matrix_i`
///
/// All matrices must share one shape and `weights` must have one entry per
/// matrix.
pub fn fuse(matrices: &[&ScoreMatrix], weights: &[f32]) -> Result<ScoreMatrix> {
    if matrices.len() != weights.len() {
        return Err(LinkerError::ShapeMismatch {
            expected: (matrices.len(), 1),
            found: (weights.len(), 1),
        });
    }
    let Some(first) = matrices.first() else {
        return Err(LinkerError::ShapeMismatch {
            expected: (1, 1),
            found: (0, 0),
        });
    };

    let (rows, cols) = first.shape();
    let mut fused = Matrix::zeros(rows, cols);
    for (matrix, weight) in matrices.iter().zip(weights) {
        fused.add_scaled(matrix, *weight)?;
    }
    Ok(fused)
}

/// Hybrid fusion: `sparse_weight * sparse + 1.0 * dense`
pub fn fuse_hybrid(
    sparse: &ScoreMatrix,
    dense: &ScoreMatrix,
    sparse_weight: f32,
) -> Result<ScoreMatrix> {
    fuse(&[sparse, dense], &[sparse_weight, DENSE_WEIGHT])
}

/// Scoring options for a single dense source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DenseScoring {
    /// Cosine similarity instead of the raw dot product
    pub cosine: bool,
    /// Min-max normalize the whole matrix to [0, 1]
    pub normalize: bool,
}

impl DenseScoring {
    /// Score every query row against every dictionary row
    pub fn score(&self, query: &Matrix, dictionary: &Matrix) -> Result<ScoreMatrix> {
        let mut scores = if self.cosine {
            query.cosine_transposed(dictionary)?
        } else {
            query.dot_transposed(dictionary)?
        };
        if self.normalize {
            min_max_normalize(&mut scores);
        }
        Ok(scores)
    }
}

/// Rescale all cells to [0, 1] using the matrix-wide minimum and maximum.
///
/// The range is global, not per row: every query in the batch shares it, so
/// scores from independently scored batches are not comparable. A constant
/// matrix maps to all zeros.
pub fn min_max_normalize(scores: &mut ScoreMatrix) {
    let Some((lo, hi)) = scores.min_max() else {
        return;
    };
    let range = hi - lo;
    if range > 0.0 {
        scores.map_inplace(|x| (x - lo) / range);
    } else {
        scores.map_inplace(|x| if x.is_nan() { x } else { 0.0 });
    }
}
