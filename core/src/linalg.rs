//! Linear algebra helpers for covariance sampling and SPD solves.
//!
//! Public API:
//!     pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn sampling_square_root(matrix: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn chol_solve_spd(a, b, opt) -> Option<DMatrix<f64>>
//!     pub fn robust_spd_solve(a, b) -> Result<DMatrix<f64>, FilterError>
//!
//! Two distinct jobs with two distinct policies:
//! - Sampling: S with matrix ≈ S Sᵀ, used to turn independent standard normals
//!   into correlated noise draws. Cholesky first; if the covariance is only
//!   positive semi-definite, a symmetric EVD square root with eigenvalues floored
//!   at exactly zero. No jitter here: a zero covariance must produce a zero factor
//!   so that zero-noise forecasts stay deterministic.
//! - Solving: A X = B for the Kalman gain. Symmetrize, Cholesky, then a jittered
//!   diagonal on a geometric ramp (the regularization policy for near-singular
//!   innovation covariances), then an explicit inverse as a last resort. A matrix
//!   that survives none of these is reported as degenerate, not panicked on.

use crate::FilterError;

use nalgebra::DMatrix;
use nalgebra::linalg::{Cholesky, SymmetricEigen};

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Kills the round-off asymmetry that accumulates in sample-covariance products.
#[inline]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

/// Compute a square root `S` such that approximately `matrix ≈ S * Sᵀ`, suitable
/// for drawing correlated Gaussian samples.
///
/// Attempts Cholesky first (lower-triangular factor). If the matrix is positive
/// semi-definite rather than definite — a diagonal covariance with zero entries is
/// the common case — falls back to the symmetric eigendecomposition square root
/// `S = U √max(Λ, 0) Uᵀ`. Flooring at zero rather than a small positive value keeps
/// zero-variance directions exactly noise free.
///
/// # Arguments
/// * `matrix` - The covariance to factor. Must be square; assumed symmetric.
pub fn sampling_square_root(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    assert!(
        matrix.is_square(),
        "sampling_square_root: matrix must be square"
    );
    let p = symmetrize(matrix);
    if let Some(ch) = Cholesky::new(p.clone()) {
        return ch.l().into_owned();
    }
    let se = SymmetricEigen::new(p);
    let u = se.eigenvectors;
    let sqrt_vals = se.eigenvalues.map(|l| l.max(0.0).sqrt());
    let sigma_half = DMatrix::<f64>::from_diagonal(&sqrt_vals);
    &u * sigma_half * u.transpose()
}

/// Jitter schedule for the regularized SPD solve.
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    pub initial_jitter: f64,
    pub max_jitter: f64,
    pub max_tries: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            initial_jitter: 1e-12,
            max_jitter: 1e-6,
            max_tries: 6,
        }
    }
}

/// Solve A X = B for SPD-ish A via Cholesky, with jitter retries.
/// Returns None if all attempts fail.
pub fn chol_solve_spd(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    opt: SolveOptions,
) -> Option<DMatrix<f64>> {
    assert!(a.is_square(), "chol_solve_spd: A must be square");
    assert_eq!(a.nrows(), b.nrows(), "chol_solve_spd: A and B incompatible");

    // Symmetrize first (SPD drift is common in sample covariances).
    let a_sym = symmetrize(a);

    if let Some(ch) = Cholesky::new(a_sym.clone()) {
        return Some(ch.solve(b));
    }

    // Jitter ramp
    let n = a_sym.nrows();
    let mut jitter = opt.initial_jitter;
    for _ in 0..opt.max_tries {
        let mut a_j = a_sym.clone();
        for i in 0..n {
            a_j[(i, i)] += jitter;
        }
        if let Some(ch) = Cholesky::new(a_j) {
            return Some(ch.solve(b));
        }
        jitter *= 10.0;
        if jitter > opt.max_jitter {
            break;
        }
    }
    None
}

/// Robust SPD solve with the documented degeneracy policy:
/// - Cholesky + jitter ramp (preferred)
/// - Explicit inverse as a last resort
/// - [`FilterError::DegenerateInnovation`] if the matrix is singular even then
pub fn robust_spd_solve(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>, FilterError> {
    if let Some(x) = chol_solve_spd(a, b, SolveOptions::default()) {
        Ok(x)
    } else if let Some(inv) = symmetrize(a).try_inverse() {
        Ok(&inv * b)
    } else {
        Err(FilterError::DegenerateInnovation)
    }
}
