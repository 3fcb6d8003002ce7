//! Property tests for scoring and candidate selection
//!
//! 1. Top-k rank correctness against a brute-force sort
//! 2. Chunked top-k equals unchunked top-k
//! 3. Hybrid fusion with zero sparse weight equals dense-only scoring

use concept_linker::fusion::{fuse_hybrid, DenseScoring};
use concept_linker::{select_top_k, Matrix, TopKSelector};
use proptest::prelude::*;

// ============================================================================
// STRATEGY HELPERS
// ============================================================================

fn arb_matrix(max_rows: usize, max_cols: usize) -> impl Strategy<Value = Matrix> {
    (1..=max_rows, 1..=max_cols).prop_flat_map(|(rows, cols)| {
        prop::collection::vec(-10.0f32..10.0, rows * cols)
            .prop_map(move |data| Matrix::from_vec(rows, cols, data).unwrap())
    })
}

/// Matrix with few distinct values so ties are common
fn arb_tied_matrix() -> impl Strategy<Value = Matrix> {
    (1usize..=6, 1usize..=8).prop_flat_map(|(rows, cols)| {
        prop::collection::vec(0u8..3, rows * cols).prop_map(move |data| {
            Matrix::from_vec(rows, cols, data.into_iter().map(f32::from).collect()).unwrap()
        })
    })
}

fn arb_matrix_and_k() -> impl Strategy<Value = (Matrix, usize)> {
    arb_matrix(8, 16).prop_flat_map(|m| {
        let cols = m.cols();
        (Just(m), 1..=cols)
    })
}

// ============================================================================
// TOP-K
// ============================================================================

proptest! {
    #[test]
    fn top_k_matches_brute_force((scores, k) in arb_matrix_and_k()) {
        let top = select_top_k(&scores, k).unwrap();
        prop_assert_eq!(top.rows(), scores.rows());

        for i in 0..scores.rows() {
            let got = top.scores(i);
            prop_assert_eq!(got.len(), k);
            prop_assert!(got.windows(2).all(|w| w[0] >= w[1]));

            let mut expected = scores.row(i).to_vec();
            expected.sort_by(|a, b| b.total_cmp(a));
            expected.truncate(k);
            prop_assert_eq!(got, expected.as_slice());

            for (&idx, &score) in top.indices(i).iter().zip(got) {
                prop_assert_eq!(scores.get(i, idx), score);
            }
        }
    }

    #[test]
    fn tied_scores_resolve_to_lower_index(scores in arb_tied_matrix()) {
        let k = scores.cols();
        let top = select_top_k(&scores, k).unwrap();
        for i in 0..scores.rows() {
            let idx = top.indices(i);
            let s = top.scores(i);
            for j in 1..k {
                if s[j - 1] == s[j] {
                    prop_assert!(idx[j - 1] < idx[j]);
                }
            }
        }
    }

    #[test]
    fn chunked_selection_matches_unchunked(
        (scores, k) in arb_matrix_and_k(),
        chunk in 1usize..10,
    ) {
        let whole = select_top_k(&scores, k).unwrap();
        let chunked = TopKSelector::new(chunk).select(&scores, k).unwrap();
        prop_assert_eq!(whole, chunked);
    }
}

// ============================================================================
// FUSION
// ============================================================================

proptest! {
    #[test]
    fn zero_sparse_weight_is_dense_only(
        (query, dict) in (1usize..5, 1usize..6, 1usize..4).prop_flat_map(|(q, d, dim)| {
            (
                prop::collection::vec(-1.0f32..1.0, q * dim)
                    .prop_map(move |v| Matrix::from_vec(q, dim, v).unwrap()),
                prop::collection::vec(-1.0f32..1.0, d * dim)
                    .prop_map(move |v| Matrix::from_vec(d, dim, v).unwrap()),
            )
        }),
        sparse_noise in -5.0f32..5.0,
    ) {
        let dense = DenseScoring::default().score(&query, &dict).unwrap();
        let mut sparse = Matrix::zeros(dense.rows(), dense.cols());
        sparse.map_inplace(|_| sparse_noise);

        let hybrid = fuse_hybrid(&sparse, &dense, 0.0).unwrap();
        prop_assert_eq!(hybrid, dense);
    }
}
