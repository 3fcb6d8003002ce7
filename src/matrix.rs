//! Numeric containers for embeddings and scores
//!
//! [`Matrix`] is a row-major dense `f32` matrix used for dense embeddings and
//! score matrices. [`SparseMatrix`] stores character n-gram embeddings in CSR
//! form: a dictionary-sized dense n-gram matrix is mostly zeros and would not
//! fit in memory for large vocabularies.
//!
//! Row order is the join key everywhere: row `i` of an embedding matrix
//! belongs to dictionary entry `i`.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{LinkerError, Result};

/// Score matrix: rows are query mentions, columns are dictionary entries
pub type ScoreMatrix = Matrix;

/// Row-major dense matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// All-zero matrix of the given shape
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from a flat row-major buffer
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(LinkerError::ShapeMismatch {
                expected: (rows, cols),
                found: (data.len() / cols.max(1), cols),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from nested rows. All rows must have the same length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len();
        let mut data = Vec::with_capacity(n * cols);
        for row in rows {
            if row.len() != cols {
                return Err(LinkerError::ShapeMismatch {
                    expected: (n, cols),
                    found: (n, row.len()),
                });
            }
            data.extend(row);
        }
        Ok(Self {
            rows: n,
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Borrow row `i`
    ///
    /// # Panics
    /// Panics if `i >= rows`.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Iterate rows in order
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // indexed rather than chunked: zero-width rows still yield one slice each
        let cols = self.cols;
        (0..self.rows).map(move |i| &self.data[i * cols..(i + 1) * cols])
    }

    /// Copy rows `start..end` into a new matrix
    pub fn slice_rows(&self, start: usize, end: usize) -> Matrix {
        let end = end.min(self.rows);
        let start = start.min(end);
        Matrix {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        }
    }

    /// Concatenate matrices along the row axis, preserving order
    pub fn vstack(parts: &[Matrix]) -> Result<Matrix> {
        let Some(first) = parts.first() else {
            return Ok(Matrix::zeros(0, 0));
        };
        let cols = first.cols;
        let rows: usize = parts.iter().map(|p| p.rows).sum();
        let mut data = Vec::with_capacity(rows * cols);
        for part in parts {
            if part.cols != cols {
                return Err(LinkerError::ShapeMismatch {
                    expected: (part.rows, cols),
                    found: part.shape(),
                });
            }
            data.extend_from_slice(&part.data);
        }
        Ok(Matrix { rows, cols, data })
    }

    /// `self · otherᵀ`: an `[n, d] x [m, d]` product giving `[n, m]`
    ///
    /// Output rows are computed in parallel; each cell is a sequential dot
    /// product, so the result does not depend on thread scheduling.
    pub fn dot_transposed(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.cols {
            return Err(LinkerError::ShapeMismatch {
                expected: (other.rows, self.cols),
                found: other.shape(),
            });
        }
        let (n, m) = (self.rows, other.rows);
        let mut out = Matrix::zeros(n, m);
        if n == 0 || m == 0 {
            return Ok(out);
        }

        out.data
            .par_chunks_mut(m)
            .enumerate()
            .for_each(|(i, out_row)| {
                let q = self.row(i);
                for (j, cell) in out_row.iter_mut().enumerate() {
                    *cell = dot(q, other.row(j));
                }
            });

        Ok(out)
    }

    /// Cosine similarity of every row of `self` against every row of `other`
    ///
    /// Zero-norm rows score 0 against everything.
    pub fn cosine_transposed(&self, other: &Matrix) -> Result<Matrix> {
        self.l2_normalized_rows()
            .dot_transposed(&other.l2_normalized_rows())
    }

    fn l2_normalized_rows(&self) -> Matrix {
        let mut out = self.clone();
        if out.cols == 0 {
            return out;
        }
        for row in out.data.chunks_mut(self.cols) {
            let norm = dot(row, row).sqrt();
            if norm > 0.0 {
                row.iter_mut().for_each(|x| *x /= norm);
            }
        }
        out
    }

    /// Column-wise mean, one value per column
    pub fn column_mean(&self) -> Vec<f32> {
        let mut acc = vec![0.0f64; self.cols];
        for row in self.iter_rows() {
            for (a, x) in acc.iter_mut().zip(row) {
                *a += *x as f64;
            }
        }
        let n = self.rows.max(1) as f64;
        acc.into_iter().map(|a| (a / n) as f32).collect()
    }

    /// Subtract `v` from every row
    pub fn subtract_row(&mut self, v: &[f32]) -> Result<()> {
        if v.len() != self.cols {
            return Err(LinkerError::ShapeMismatch {
                expected: (1, self.cols),
                found: (1, v.len()),
            });
        }
        if self.cols == 0 {
            return Ok(());
        }
        for row in self.data.chunks_mut(self.cols) {
            for (x, m) in row.iter_mut().zip(v) {
                *x -= m;
            }
        }
        Ok(())
    }

    /// `self += weight * other`
    pub fn add_scaled(&mut self, other: &Matrix, weight: f32) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(LinkerError::ShapeMismatch {
                expected: self.shape(),
                found: other.shape(),
            });
        }
        for (x, y) in self.data.iter_mut().zip(&other.data) {
            *x += weight * y;
        }
        Ok(())
    }

    /// Global minimum and maximum over all cells, ignoring NaN
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|x| !x.is_nan())
            .fold(None, |acc, x| match acc {
                None => Some((x, x)),
                Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
            })
    }

    pub fn map_inplace(&mut self, f: impl Fn(f32) -> f32) {
        self.data.iter_mut().for_each(|x| *x = f(*x));
    }

    /// Buffer length agrees with the shape (false only for decoded garbage)
    pub(crate) fn is_well_formed(&self) -> bool {
        self.data.len() == self.rows * self.cols
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Compressed sparse row matrix over a fixed feature vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<u32>,
    values: Vec<f32>,
}

impl SparseMatrix {
    /// Empty matrix (zero rows) of the given feature width
    pub fn new(cols: usize) -> Self {
        Self {
            cols,
            indptr: vec![0],
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Append a row given as `(feature, value)` pairs
    pub fn push_row(&mut self, entries: impl IntoIterator<Item = (u32, f32)>) {
        for (idx, value) in entries {
            debug_assert!((idx as usize) < self.cols, "feature index out of range");
            self.indices.push(idx);
            self.values.push(value);
        }
        self.indptr.push(self.indices.len());
    }

    pub fn rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols)
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Borrow the stored features and values of row `i`
    pub fn row(&self, i: usize) -> (&[u32], &[f32]) {
        let (start, end) = (self.indptr[i], self.indptr[i + 1]);
        (&self.indices[start..end], &self.values[start..end])
    }

    /// Concatenate along the row axis, preserving order
    pub fn vstack(parts: &[SparseMatrix]) -> Result<SparseMatrix> {
        let Some(first) = parts.first() else {
            return Ok(SparseMatrix::new(0));
        };
        let mut out = SparseMatrix::new(first.cols);
        for part in parts {
            if part.cols != out.cols {
                return Err(LinkerError::ShapeMismatch {
                    expected: (part.rows(), out.cols),
                    found: part.shape(),
                });
            }
            for i in 0..part.rows() {
                let (idx, val) = part.row(i);
                out.push_row(idx.iter().copied().zip(val.iter().copied()));
            }
        }
        Ok(out)
    }

    /// `self · otherᵀ` as a dense score matrix
    pub fn dot_transposed(&self, other: &SparseMatrix) -> Result<Matrix> {
        if self.cols != other.cols {
            return Err(LinkerError::ShapeMismatch {
                expected: (other.rows(), self.cols),
                found: other.shape(),
            });
        }
        let (n, m) = (self.rows(), other.rows());
        let mut out = Matrix::zeros(n, m);
        if n == 0 || m == 0 {
            return Ok(out);
        }

        let mut scratch = vec![0.0f32; self.cols];
        for (i, out_row) in out.data.chunks_mut(m).enumerate() {
            let (q_idx, q_val) = self.row(i);
            for (&f, &v) in q_idx.iter().zip(q_val) {
                scratch[f as usize] += v;
            }
            let scratch_ref = &scratch;
            out_row.par_iter_mut().enumerate().for_each(|(j, cell)| {
                let (d_idx, d_val) = other.row(j);
                *cell = d_idx
                    .iter()
                    .zip(d_val)
                    .map(|(&f, &v)| scratch_ref[f as usize] * v)
                    .sum();
            });
            for &f in q_idx {
                scratch[f as usize] = 0.0;
            }
        }
        Ok(out)
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        self.indptr.first() == Some(&0)
            && self.indptr.windows(2).all(|w| w[0] <= w[1])
            && self.indptr.last() == Some(&self.indices.len())
            && self.indices.len() == self.values.len()
            && self.indices.iter().all(|&f| (f as usize) < self.cols)
    }

    /// Expand into a dense matrix
    pub fn to_dense(&self) -> Matrix {
        let mut out = Matrix::zeros(self.rows(), self.cols);
        for i in 0..self.rows() {
            let (idx, val) = self.row(i);
            for (&f, &v) in idx.iter().zip(val) {
                out.data[i * self.cols + f as usize] += v;
            }
        }
        out
    }
}
