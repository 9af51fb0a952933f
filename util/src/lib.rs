use nalgebra::{DMatrix, DVector};

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

pub fn prefix_sum(counts: impl IntoIterator<Item = usize>, x0: usize) -> impl Iterator<Item = usize> {
    counts.into_iter().scan(x0, |sum, x| {
        let current = *sum;
        *sum += x;
        Some(current)
    })
}

/// Accumulates `(row, col, value)` triplets into a dense `n x n` matrix.
pub fn dense_from_triplets(n: usize, triplets: impl IntoIterator<Item = (usize, usize, f64)>) -> DMatrix<f64> {
    let mut dense = DMatrix::zeros(n, n);
    for (i, j, v) in triplets {
        dense[(i, j)] += v;
    }
    dense
}

/// Scatters `(row, value)` entries into a dense vector of length `n`.
pub fn dense_from_entries(n: usize, entries: impl IntoIterator<Item = (usize, f64)>) -> DVector<f64> {
    let mut dense = DVector::zeros(n);
    for (i, v) in entries {
        dense[i] += v;
    }
    dense
}
