//! Top-k candidate selection over score matrices
//!
//! Per query row, the k best columns are found with a partial selection
//! (`select_nth_unstable_by`, O(d) expected) and only those k are sorted.
//! Ranking is a total order: higher score first, then lower column index,
//! with NaN ranked below every number. Ties therefore resolve to the
//! dictionary entry that appears first in the file, on every run.
//!
//! [`TopKSelector`] can process the query axis in fixed-size chunks. The
//! output is identical to the unchunked path; chunking only bounds how many
//! rows are in flight at once.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::error::{LinkerError, Result};
use crate::matrix::ScoreMatrix;

/// Top-k result for a batch of queries: `[rows, k]` indices and scores
#[derive(Debug, Clone, PartialEq)]
pub struct TopK {
    k: usize,
    indices: Vec<usize>,
    scores: Vec<f32>,
}

impl TopK {
    fn with_capacity(rows: usize, k: usize) -> Self {
        Self {
            k,
            indices: Vec::with_capacity(rows * k),
            scores: Vec::with_capacity(rows * k),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn rows(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.indices.len() / self.k
        }
    }

    /// Column indices of row `i`, best first
    pub fn indices(&self, i: usize) -> &[usize] {
        &self.indices[i * self.k..(i + 1) * self.k]
    }

    /// Scores of row `i`, non-increasing
    pub fn scores(&self, i: usize) -> &[f32] {
        &self.scores[i * self.k..(i + 1) * self.k]
    }

    /// Append the rows of `other`, preserving order
    pub fn extend(&mut self, other: TopK) {
        debug_assert_eq!(self.k, other.k);
        self.indices.extend(other.indices);
        self.scores.extend(other.scores);
    }
}

/// Top-k selector, optionally chunked along the query axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopKSelector {
    chunk_rows: usize,
}

impl Default for TopKSelector {
    fn default() -> Self {
        Self::unchunked()
    }
}

impl TopKSelector {
    /// Process the query axis `chunk_rows` rows at a time (0 means unchunked)
    pub fn new(chunk_rows: usize) -> Self {
        Self { chunk_rows }
    }

    pub fn unchunked() -> Self {
        Self { chunk_rows: 0 }
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Select the top `k` columns of every row
    ///
    /// Fails with [`LinkerError::InvalidK`] when `k == 0` or `k` exceeds the
    /// number of columns, before any work is done.
    pub fn select(&self, scores: &ScoreMatrix, k: usize) -> Result<TopK> {
        validate_k(k, scores.cols())?;

        let rows = scores.rows();
        let chunk = if self.chunk_rows == 0 {
            rows.max(1)
        } else {
            self.chunk_rows
        };

        let mut out = TopK::with_capacity(rows, k);
        let mut start = 0;
        while start < rows {
            let end = (start + chunk).min(rows);
            out.extend(select_rows(scores, start..end, k));
            start = end;
        }
        Ok(out)
    }
}

/// Unchunked top-k selection
pub fn select_top_k(scores: &ScoreMatrix, k: usize) -> Result<TopK> {
    TopKSelector::unchunked().select(scores, k)
}

/// Check `k` against the number of candidates
pub fn validate_k(k: usize, available: usize) -> Result<()> {
    if k == 0 || k > available {
        return Err(LinkerError::InvalidK { k, available });
    }
    Ok(())
}

/// Top-k of a contiguous block of rows, in row order
pub(crate) fn select_rows(
    scores: &ScoreMatrix,
    rows: std::ops::Range<usize>,
    k: usize,
) -> TopK {
    let per_row: Vec<(usize, Vec<usize>)> = rows
        .into_par_iter()
        .map(|i| (i, top_k_row(scores.row(i), k)))
        .collect();

    let mut out = TopK::with_capacity(per_row.len(), k);
    for (i, idx) in per_row {
        let row = scores.row(i);
        out.scores.extend(idx.iter().map(|&j| row[j]));
        out.indices.extend(idx);
    }
    out
}

fn top_k_row(row: &[f32], k: usize) -> Vec<usize> {
    let rank = |a: &usize, b: &usize| rank_order(row, *a, *b);
    let mut idx: Vec<usize> = (0..row.len()).collect();
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, rank);
        idx.truncate(k);
    }
    idx.sort_unstable_by(rank);
    idx
}

/// Total order: descending score, NaN last, ties by ascending index
fn rank_order(row: &[f32], a: usize, b: usize) -> Ordering {
    rank_key(row[b])
        .total_cmp(&rank_key(row[a]))
        .then_with(|| a.cmp(&b))
}

#[inline]
fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else if score == 0.0 {
        // -0.0 and 0.0 are equal scores
        0.0
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;

    fn m(rows: Vec<Vec<f32>>) -> Matrix {
        Matrix::from_rows(rows).unwrap()
    }

    #[test]
    fn test_descending_order() {
        let s = m(vec![vec![0.1, 0.9, 0.5, 0.7]]);
        let top = select_top_k(&s, 3).unwrap();
        assert_eq!(top.indices(0), &[1, 3, 2]);
        assert_eq!(top.scores(0), &[0.9, 0.7, 0.5]);
    }

    #[test]
    fn test_signed_zeros_tie_by_index() {
        let s = m(vec![vec![-0.0, 0.0, -1.0]]);
        let top = select_top_k(&s, 2).unwrap();
        assert_eq!(top.indices(0), &[0, 1]);
    }

    #[test]
    fn test_ties_resolve_to_lower_index() {
        let s = m(vec![vec![1.0, 0.0, 1.0]]);
        for _ in 0..10 {
            let top = select_top_k(&s, 2).unwrap();
            assert_eq!(top.indices(0), &[0, 2]);
        }
    }

    #[test]
    fn test_nan_ranks_last() {
        let s = m(vec![vec![f32::NAN, -5.0, 2.0]]);
        let top = select_top_k(&s, 3).unwrap();
        assert_eq!(top.indices(0), &[2, 1, 0]);
    }

    #[test]
    fn test_k_equal_to_width() {
        let s = m(vec![vec![0.3, 0.2], vec![0.1, 0.4]]);
        let top = select_top_k(&s, 2).unwrap();
        assert_eq!(top.rows(), 2);
        assert_eq!(top.indices(0), &[0, 1]);
        assert_eq!(top.indices(1), &[1, 0]);
    }

    #[test]
    fn test_invalid_k() {
        let s = m(vec![vec![0.3, 0.2]]);
        assert!(matches!(
            select_top_k(&s, 0),
            Err(LinkerError::InvalidK { k: 0, available: 2 })
        ));
        assert!(matches!(
            select_top_k(&s, 3),
            Err(LinkerError::InvalidK { k: 3, available: 2 })
        ));
    }

    #[test]
    fn test_chunked_matches_unchunked() {
        let s = m(vec![
            vec![0.5, 0.1, 0.9, 0.3],
            vec![0.2, 0.2, 0.8, 0.0],
            vec![0.7, 0.6, 0.1, 0.6],
            vec![0.0, 0.0, 0.0, 0.0],
            vec![0.4, 0.9, 0.3, 0.2],
        ]);
        let whole = select_top_k(&s, 2).unwrap();
        for chunk in 1..=6 {
            assert_eq!(TopKSelector::new(chunk).select(&s, 2).unwrap(), whole);
        }
    }

    #[test]
    fn test_empty_query_batch() {
        let s = Matrix::zeros(0, 4);
        let top = select_top_k(&s, 2).unwrap();
        assert_eq!(top.rows(), 0);
    }
}
