//! Small dense solves on top of faer
//!
//! The design matrices here have a handful of columns, so everything goes
//! through Cholesky factorisations of `p x p` normal-equation systems.

use faer::prelude::*;
use faer::{Mat, Side};

use super::error::RateError;

/// Row-major design rows into a faer matrix.
pub fn design_matrix(rows: &[Vec<f64>], ncols: usize) -> Mat<f64> {
    Mat::from_fn(rows.len(), ncols, |i, j| rows[i][j])
}

/// Column vector from a slice.
pub fn column(values: &[f64]) -> Mat<f64> {
    Mat::from_fn(values.len(), 1, |i, _| values[i])
}

/// `X^T diag(w) X` for a weighted least-squares system.
pub fn weighted_gram(x: &Mat<f64>, w: &[f64]) -> Mat<f64> {
    let wx = Mat::from_fn(x.nrows(), x.ncols(), |i, j| w[i] * x[(i, j)]);
    x.transpose() * &wx
}

/// `X^T (w .* r)`
pub fn weighted_cross(x: &Mat<f64>, w: &[f64], r: &[f64]) -> Mat<f64> {
    let wr = Mat::from_fn(r.len(), 1, |i, _| w[i] * r[i]);
    x.transpose() * &wr
}

/// Solve `A x = b` for symmetric positive definite `A`.
pub fn solve_spd(a: &Mat<f64>, b: &Mat<f64>) -> Result<Mat<f64>, RateError> {
    let llt = a
        .cholesky(Side::Lower)
        .map_err(|_| RateError::FitFailed("system is not positive definite".to_string()))?;
    Ok(llt.solve(b))
}

/// Inverse of a symmetric positive definite matrix.
pub fn spd_inverse(a: &Mat<f64>) -> Result<Mat<f64>, RateError> {
    let llt = a
        .cholesky(Side::Lower)
        .map_err(|_| RateError::FitFailed("system is not positive definite".to_string()))?;
    Ok(llt.inverse())
}

/// Lower Cholesky factor `L` with `A = L L^T`.
pub fn lower_factor(a: &Mat<f64>) -> Result<Mat<f64>, RateError> {
    let llt = a
        .cholesky(Side::Lower)
        .map_err(|_| RateError::FitFailed("system is not positive definite".to_string()))?;
    Ok(llt.compute_l())
}

/// Dot product of a design row with a coefficient column.
pub fn row_dot(row: &[f64], beta: &Mat<f64>) -> f64 {
    row.iter().enumerate().map(|(j, x)| x * beta[(j, 0)]).sum()
}
