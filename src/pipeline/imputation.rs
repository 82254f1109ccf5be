//! Multiple imputation of missing covariates
//!
//! Each completion runs a round-robin of Bayesian linear regressions: every
//! covariate with gaps is regressed on the others and its missing entries are
//! replaced by draws from the posterior predictive distribution. Because the
//! draws are stochastic, the K completions differ, which is what lets pooled
//! estimates carry imputation uncertainty.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use rayon::prelude::*;
use serde::Serialize;

use super::error::RateError;
use super::linalg::{column, design_matrix, lower_factor, row_dot, spd_inverse, weighted_cross, weighted_gram};
use super::loader::ProcedureTable;

/// Settings for the multiple imputer
#[derive(Debug, Clone, Serialize)]
pub struct ImputationConfig {
    /// Number of completed datasets (K)
    pub n_imputations: usize,
    /// Round-robin sweeps over the covariates
    pub max_iter: usize,
    /// Base seed; completion `k` uses `seed + k`
    pub seed: Option<u64>,
    /// Ridge added to the normal equations, relative to their diagonal
    pub ridge: f64,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            n_imputations: 5,
            max_iter: 10,
            seed: None,
            ridge: 1e-5,
        }
    }
}

/// One completed covariate table, row-aligned with the source table.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputedDataset {
    pub index: usize,
    pub event_ids: Vec<String>,
    columns: Vec<(String, Vec<f64>)>,
}

impl ImputedDataset {
    pub fn new(index: usize, event_ids: Vec<String>, columns: Vec<(String, Vec<f64>)>) -> Self {
        Self {
            index,
            event_ids,
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn n_rows(&self) -> usize {
        self.event_ids.len()
    }

    /// `(rows, columns)` counting the identifier column
    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows(), self.columns.len() + 1)
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        let values = self.column(name)?;
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Generates K completed covariate tables.
#[derive(Debug, Clone, Default)]
pub struct MultipleImputer {
    config: ImputationConfig,
}

impl MultipleImputer {
    pub fn new(config: ImputationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImputationConfig {
        &self.config
    }

    /// Produce `n_imputations` completions of `vars` from `table`.
    ///
    /// Fails if any variable is not a covariate of the table, or has no
    /// observed value at all. Completions are computed in parallel and do not
    /// share state.
    pub fn impute(
        &self,
        table: &ProcedureTable,
        vars: &[String],
    ) -> Result<Vec<ImputedDataset>, RateError> {
        if self.config.n_imputations == 0 {
            return Err(RateError::Config(
                "at least one imputation is required".to_string(),
            ));
        }

        let missing: Vec<String> = vars
            .iter()
            .filter(|v| table.covariate(v).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(RateError::MissingColumns(missing));
        }

        let observed: Vec<Vec<Option<f64>>> = vars
            .iter()
            .filter_map(|v| table.covariate(v).map(|c| c.to_vec()))
            .collect();
        for (name, values) in vars.iter().zip(observed.iter()) {
            if !values.is_empty() && values.iter().all(|v| v.is_none()) {
                return Err(RateError::NothingObserved(name.clone()));
            }
        }

        // Fewest missing values first, like a standard round-robin imputer
        let mut order: Vec<usize> = (0..vars.len()).collect();
        order.sort_by_key(|&j| observed[j].iter().filter(|v| v.is_none()).count());

        (0..self.config.n_imputations)
            .into_par_iter()
            .map(|k| {
                let mut rng = match self.config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(k as u64)),
                    None => StdRng::from_entropy(),
                };
                let completed = complete_once(&observed, &order, &self.config, &mut rng)?;
                let columns = vars.iter().cloned().zip(completed).collect();
                Ok(ImputedDataset::new(k, table.event_ids.clone(), columns))
            })
            .collect()
    }
}

/// Observed summary of one covariate
#[derive(Debug, Clone, Copy)]
struct Observed {
    mean: f64,
    min: f64,
    max: f64,
}

fn summarize(values: &[Option<f64>]) -> Observed {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let n = present.len().max(1) as f64;
    Observed {
        mean: present.iter().sum::<f64>() / n,
        min: present.iter().copied().fold(f64::INFINITY, f64::min),
        max: present.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

fn complete_once(
    observed: &[Vec<Option<f64>>],
    order: &[usize],
    config: &ImputationConfig,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f64>>, RateError> {
    let stats: Vec<Observed> = observed.iter().map(|c| summarize(c)).collect();
    let mut filled: Vec<Vec<f64>> = observed
        .iter()
        .zip(stats.iter())
        .map(|(col, s)| col.iter().map(|v| v.unwrap_or(s.mean)).collect())
        .collect();

    let gaps: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&j| observed[j].iter().any(|v| v.is_none()))
        .collect();
    if gaps.is_empty() {
        return Ok(filled);
    }

    for _ in 0..config.max_iter {
        for &target in &gaps {
            draw_column(observed, &mut filled, target, stats[target], config.ridge, rng)?;
        }
    }

    Ok(filled)
}

/// One Bayesian regression draw for the missing entries of `target`.
fn draw_column(
    observed: &[Vec<Option<f64>>],
    filled: &mut [Vec<f64>],
    target: usize,
    bounds: Observed,
    ridge: f64,
    rng: &mut StdRng,
) -> Result<(), RateError> {
    let n = filled[target].len();
    let predictors: Vec<usize> = (0..filled.len()).filter(|&j| j != target).collect();

    // Standardise predictors on the current completed values
    let scaled: Vec<(f64, f64)> = predictors
        .iter()
        .map(|&j| {
            let mean = filled[j].iter().sum::<f64>() / n as f64;
            let var = filled[j].iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
            (mean, var.sqrt())
        })
        .collect();
    let design_row = |i: usize| -> Vec<f64> {
        let mut row = Vec::with_capacity(predictors.len() + 1);
        row.push(1.0);
        for (&j, &(mean, sd)) in predictors.iter().zip(scaled.iter()) {
            row.push(if sd > 1e-12 { (filled[j][i] - mean) / sd } else { 0.0 });
        }
        row
    };

    let (obs_rows, mis_rows): (Vec<usize>, Vec<usize>) =
        (0..n).partition(|&i| observed[target][i].is_some());
    let p = predictors.len() + 1;

    let x_rows: Vec<Vec<f64>> = obs_rows.iter().map(|&i| design_row(i)).collect();
    let y: Vec<f64> = obs_rows.iter().map(|&i| filled[target][i]).collect();
    let unit = vec![1.0; y.len()];
    let x = design_matrix(&x_rows, p);

    let mut gram = weighted_gram(&x, &unit);
    for j in 0..p {
        gram[(j, j)] += ridge * gram[(j, j)].max(1.0);
    }
    let covariance = spd_inverse(&gram)?;
    let beta_hat = &covariance * &weighted_cross(&x, &unit, &y);

    let rss: f64 = x_rows
        .iter()
        .zip(y.iter())
        .map(|(row, yi)| (yi - row_dot(row, &beta_hat)).powi(2))
        .sum();
    let dof = (y.len() as f64 - p as f64).max(1.0);
    let chi = ChiSquared::new(dof)
        .map_err(|e| RateError::FitFailed(format!("invalid degrees of freedom: {e}")))?;
    let sigma = (rss / chi.sample(rng).max(f64::MIN_POSITIVE)).sqrt();

    // beta* = beta_hat + sigma * L z, with L L^T = (X^T X + ridge)^-1
    let factor = lower_factor(&covariance)?;
    let z: Vec<f64> = (0..p).map(|_| rng.sample(StandardNormal)).collect();
    let shift = &factor * &column(&z);
    let beta_draw = column(
        &(0..p)
            .map(|j| beta_hat[(j, 0)] + sigma * shift[(j, 0)])
            .collect::<Vec<f64>>(),
    );

    let draws: Vec<(usize, f64)> = mis_rows
        .iter()
        .map(|&i| {
            let noise: f64 = rng.sample(StandardNormal);
            let value = row_dot(&design_row(i), &beta_draw) + sigma * noise;
            (i, value.clamp(bounds.min, bounds.max))
        })
        .collect();
    for (i, value) in draws {
        filled[target][i] = value;
    }

    Ok(())
}

/// Check completed datasets against the observed data.
///
/// All completions must share one shape, and no completion's mean for an
/// imputed variable may sit more than two observed standard deviations away
/// from the observed mean.
pub fn validate_imputations(
    table: &ProcedureTable,
    imputed: &[ImputedDataset],
    vars: &[String],
) -> Result<(), RateError> {
    if imputed.is_empty() {
        return Err(RateError::Config("no imputed datasets provided".to_string()));
    }

    let shapes: Vec<(usize, usize)> = imputed.iter().map(|d| d.shape()).collect();
    if shapes.iter().any(|s| *s != shapes[0]) {
        return Err(RateError::ShapeMismatch(shapes));
    }

    for var in vars {
        let original = table
            .covariate(var)
            .ok_or_else(|| RateError::MissingColumns(vec![var.clone()]))?;
        let present: Vec<f64> = original.iter().flatten().copied().collect();
        if present.is_empty() {
            return Err(RateError::NothingObserved(var.clone()));
        }
        let observed_mean = present.iter().sum::<f64>() / present.len() as f64;
        let observed_sd = sample_sd(&present, observed_mean);

        for dataset in imputed {
            let imputed_mean = dataset
                .mean(var)
                .ok_or_else(|| RateError::MissingColumns(vec![var.clone()]))?;
            if (observed_mean - imputed_mean).abs() > 2.0 * observed_sd {
                return Err(RateError::ImputationSanity {
                    variable: var.clone(),
                    index: dataset.index,
                    imputed_mean,
                    observed_mean,
                    observed_sd,
                });
            }
        }
    }

    Ok(())
}

fn sample_sd(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}
