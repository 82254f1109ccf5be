//! Weighted outcome model fits
//!
//! Logistic regression by penalised Newton iterations (IRLS) with step
//! halving, and weighted ridge least squares for continuous outcomes. Both
//! standardise covariates internally and leave the intercept unpenalised.

use faer::Mat;

use super::error::RateError;
use super::linalg::{column, design_matrix, row_dot, solve_spd, weighted_cross, weighted_gram};

/// Linear predictor is clamped to this range before the logistic transform
const ETA_LIMIT: f64 = 700.0;

/// Probabilities are kept this far from 0 and 1 inside the log-likelihood
const PROB_EPS: f64 = 1e-12;

/// Maximum number of halvings of one Newton step
const MAX_STEP_HALVINGS: usize = 30;

/// Settings for the iterative fit
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Maximum Newton iterations
    pub max_iter: usize,
    /// Convergence tolerance on the largest coefficient update
    pub tolerance: f64,
    /// L2 penalty on standardised coefficients (inverse regularisation strength)
    pub penalty: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tolerance: 1e-8,
            penalty: 1.0,
        }
    }
}

/// Centre and scale applied to each covariate before fitting.
#[derive(Debug, Clone)]
pub struct Standardizer {
    pub means: Vec<f64>,
    /// Zero for constant columns, which then contribute nothing
    pub scales: Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[Vec<f64>], ncols: usize) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; ncols];
        for row in rows {
            for (j, x) in row.iter().enumerate() {
                means[j] += x / n;
            }
        }
        let mut scales = vec![0.0; ncols];
        for row in rows {
            for (j, x) in row.iter().enumerate() {
                scales[j] += (x - means[j]).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = s.sqrt();
            if *s < 1e-12 {
                *s = 0.0;
            }
        }
        Self { means, scales }
    }

    /// Standardised row with a leading intercept term
    pub fn design_row(&self, row: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(row.len() + 1);
        out.push(1.0);
        for (j, x) in row.iter().enumerate() {
            let scale = self.scales[j];
            out.push(if scale > 0.0 {
                (x - self.means[j]) / scale
            } else {
                0.0
            });
        }
        out
    }
}

/// A fitted logistic regression
#[derive(Debug, Clone)]
pub struct LogisticFit {
    /// Coefficients on the standardised scale, intercept first
    pub beta: Vec<f64>,
    pub standardizer: Standardizer,
    pub iterations: usize,
    pub converged: bool,
}

impl LogisticFit {
    /// Predicted event probability for a raw covariate row.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let z = self.standardizer.design_row(row);
        let eta: f64 = z.iter().zip(self.beta.iter()).map(|(x, b)| x * b).sum();
        sigmoid(eta)
    }
}

/// A fitted weighted ridge regression
#[derive(Debug, Clone)]
pub struct LinearFit {
    pub beta: Vec<f64>,
    pub standardizer: Standardizer,
}

impl LinearFit {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let z = self.standardizer.design_row(row);
        z.iter().zip(self.beta.iter()).map(|(x, b)| x * b).sum()
    }
}

#[inline]
pub fn sigmoid(eta: f64) -> f64 {
    let eta = eta.clamp(-ETA_LIMIT, ETA_LIMIT);
    1.0 / (1.0 + (-eta).exp())
}

/// Fit `P(y = 1 | x)` by penalised weighted maximum likelihood.
///
/// # Arguments
/// * `rows` - Covariate rows (raw scale), all the same length
/// * `y` - 0/1 outcomes
/// * `weights` - Non-negative per-row weights
/// * `config` - Iteration limits and penalty
pub fn fit_logistic(
    rows: &[Vec<f64>],
    y: &[f64],
    weights: &[f64],
    config: &FitConfig,
) -> Result<LogisticFit, RateError> {
    let ncols = check_inputs(rows, y, weights)?;
    let standardizer = Standardizer::fit(rows, ncols);
    let design: Vec<Vec<f64>> = rows.iter().map(|r| standardizer.design_row(r)).collect();
    let p = ncols + 1;
    let x = design_matrix(&design, p);

    let mut beta = column(&vec![0.0; p]);
    let mut objective = penalized_loglik(&design, y, weights, &beta, config.penalty);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iter {
        iterations = iter + 1;

        let mu: Vec<f64> = design.iter().map(|r| sigmoid(row_dot(r, &beta))).collect();
        let residual: Vec<f64> = y.iter().zip(mu.iter()).map(|(yi, mi)| yi - mi).collect();
        let curvature: Vec<f64> = mu
            .iter()
            .zip(weights.iter())
            .map(|(m, w)| w * (m * (1.0 - m)).max(1e-10))
            .collect();

        let mut gradient = weighted_cross(&x, weights, &residual);
        let mut hessian = weighted_gram(&x, &curvature);
        for j in 1..p {
            gradient[(j, 0)] -= config.penalty * beta[(j, 0)];
            hessian[(j, j)] += config.penalty;
        }
        hessian[(0, 0)] += 1e-10;

        let step = solve_spd(&hessian, &gradient)?;

        // Halve the step until the penalised likelihood does not decrease
        let mut scale = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_STEP_HALVINGS {
            let trial = Mat::from_fn(p, 1, |j, _| beta[(j, 0)] + scale * step[(j, 0)]);
            let trial_objective = penalized_loglik(&design, y, weights, &trial, config.penalty);
            if trial_objective.is_finite() && trial_objective >= objective - 1e-12 {
                accepted = Some((trial, trial_objective));
                break;
            }
            scale *= 0.5;
        }

        let Some((next, next_objective)) = accepted else {
            // No ascent direction left; the current point is as good as it gets
            converged = true;
            break;
        };

        let max_change = (0..p)
            .map(|j| (scale * step[(j, 0)]).abs())
            .fold(0.0, f64::max);
        beta = next;
        let gain = next_objective - objective;
        objective = next_objective;

        if max_change < config.tolerance || gain.abs() < config.tolerance * (objective.abs() + config.tolerance) {
            converged = true;
            break;
        }
    }

    let beta: Vec<f64> = (0..p).map(|j| beta[(j, 0)]).collect();
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(RateError::FitFailed(
            "logistic coefficients diverged".to_string(),
        ));
    }

    Ok(LogisticFit {
        beta,
        standardizer,
        iterations,
        converged,
    })
}

/// Weighted ridge least squares with an unpenalised intercept.
pub fn fit_linear(
    rows: &[Vec<f64>],
    y: &[f64],
    weights: &[f64],
    config: &FitConfig,
) -> Result<LinearFit, RateError> {
    let ncols = check_inputs(rows, y, weights)?;
    let standardizer = Standardizer::fit(rows, ncols);
    let design: Vec<Vec<f64>> = rows.iter().map(|r| standardizer.design_row(r)).collect();
    let p = ncols + 1;
    let x = design_matrix(&design, p);

    let mut gram = weighted_gram(&x, weights);
    for j in 1..p {
        gram[(j, j)] += config.penalty;
    }
    gram[(0, 0)] += 1e-10;
    let rhs = weighted_cross(&x, weights, y);
    let beta = solve_spd(&gram, &rhs)?;

    Ok(LinearFit {
        beta: (0..p).map(|j| beta[(j, 0)]).collect(),
        standardizer,
    })
}

fn check_inputs(rows: &[Vec<f64>], y: &[f64], weights: &[f64]) -> Result<usize, RateError> {
    if rows.is_empty() {
        return Err(RateError::NoCompleteCases);
    }
    if rows.len() != y.len() || rows.len() != weights.len() {
        return Err(RateError::FitFailed(format!(
            "input lengths differ: {} rows, {} outcomes, {} weights",
            rows.len(),
            y.len(),
            weights.len()
        )));
    }
    let ncols = rows[0].len();
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(RateError::FitFailed("ragged covariate rows".to_string()));
    }
    Ok(ncols)
}

fn penalized_loglik(design: &[Vec<f64>], y: &[f64], weights: &[f64], beta: &Mat<f64>, penalty: f64) -> f64 {
    let loglik: f64 = design
        .iter()
        .zip(y.iter())
        .zip(weights.iter())
        .map(|((row, &yi), &w)| {
            let mu = sigmoid(row_dot(row, beta)).clamp(PROB_EPS, 1.0 - PROB_EPS);
            w * (yi * mu.ln() + (1.0 - yi) * (1.0 - mu).ln())
        })
        .sum();
    let ridge: f64 = (1..beta.nrows()).map(|j| beta[(j, 0)].powi(2)).sum();
    loglik - 0.5 * penalty * ridge
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_intercept_only_matches_weighted_event_rate() {
        // Constant covariate carries no information, so the fit is the event rate
        let rows: Vec<Vec<f64>> = (0..8).map(|_| vec![3.0]).collect();
        let y = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let w = [1.0; 8];
        let fit = fit_logistic(&rows, &y, &w, &FitConfig::default()).unwrap();
        assert!(fit.converged);
        assert_relative_eq!(fit.predict_proba(&[3.0]), 0.25, epsilon = 1e-6);
        assert_relative_eq!(fit.predict_proba(&[100.0]), 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_logistic_picks_up_direction_of_effect() {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..40).map(|i| if i % 5 < (i / 10) + 1 { 1.0 } else { 0.0 }).collect();
        let w = vec![1.0; 40];
        let fit = fit_logistic(&rows, &y, &w, &FitConfig::default()).unwrap();
        assert!(fit.predict_proba(&[35.0]) > fit.predict_proba(&[5.0]));
    }

    #[test]
    fn test_separable_data_stays_finite() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| if i >= 5 { 1.0 } else { 0.0 }).collect();
        let fit = fit_logistic(&rows, &y, &[1.0; 10], &FitConfig::default()).unwrap();
        assert!(fit.beta.iter().all(|b| b.is_finite()));
        assert!(fit.predict_proba(&[9.0]) > 0.5);
        assert!(fit.predict_proba(&[0.0]) < 0.5);
    }

    #[test]
    fn test_linear_fit_recovers_line() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| 2.0 + 0.5 * i as f64).collect();
        let config = FitConfig {
            penalty: 1e-9,
            ..Default::default()
        };
        let fit = fit_linear(&rows, &y, &[1.0; 20], &config).unwrap();
        assert_relative_eq!(fit.predict(&[10.0]), 7.0, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_input_is_no_complete_cases() {
        let err = fit_logistic(&[], &[], &[], &FitConfig::default()).unwrap_err();
        assert!(matches!(err, RateError::NoCompleteCases));
    }
}
