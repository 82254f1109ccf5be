//! Per-practitioner rate estimation
//!
//! For one model specification and one completed dataset, fits the outcome
//! model on the eligible complete cases and reports each practitioner's raw
//! rate alongside a covariate-adjusted rate.
//!
//! By default the adjusted rate is the fitted model's prediction at a supplied
//! reference covariate vector, and equals the raw rate when no reference is
//! given. [`AdjustmentRule::ObservedExpected`] instead scales the reference
//! prediction by each practitioner's observed-to-expected ratio.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::enumerator::ModelSpecification;
use super::error::RateError;
use super::imputation::ImputedDataset;
use super::loader::ProcedureTable;
use super::logistic::{fit_linear, fit_logistic, FitConfig, LinearFit, LogisticFit};
use super::weights::{fit_weights, seniority_weights};

/// Outcome model used for adjustment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum OutcomeModel {
    /// Weighted, class-balanced logistic regression (binary outcomes)
    #[default]
    Logistic,
    /// Weighted ridge regression (continuous outcomes)
    Linear,
}

impl OutcomeModel {
    /// Method tag written to the output table
    pub fn method_tag(&self) -> &'static str {
        match self {
            OutcomeModel::Logistic => "logistic_regression",
            OutcomeModel::Linear => "linear_regression",
        }
    }
}

impl fmt::Display for OutcomeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeModel::Logistic => write!(f, "LOGISTIC"),
            OutcomeModel::Linear => write!(f, "LINEAR"),
        }
    }
}

impl FromStr for OutcomeModel {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOGISTIC" => Ok(OutcomeModel::Logistic),
            "LINEAR" => Ok(OutcomeModel::Linear),
            _ => Err(RateError::UnsupportedModel(s.to_string())),
        }
    }
}

/// How a fitted model turns into a per-practitioner adjusted rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AdjustmentRule {
    /// Prediction at `avg_covariates`; the raw rate when none are supplied
    #[default]
    Reference,
    /// Reference prediction times observed / expected (additive for linear
    /// models). The reference is `avg_covariates` or the complete-case means.
    ObservedExpected,
}

/// Method tag used when the outcome never varies and no model is fitted
pub const CONSTANT_OUTCOME_METHOD: &str = "constant_outcome";

/// Settings shared by every estimation unit
#[derive(Debug, Clone, Serialize)]
pub struct EstimatorConfig {
    /// Adjustment covariates, in design order
    pub covariates: Vec<String>,
    /// Weighting (seniority) column
    pub weight_column: String,
    /// Column tested by the severity strata
    pub stratify_by: String,
    /// Trailing window length in days; `None` means all history up to the window date
    pub lookback_days: Option<i64>,
    pub model: OutcomeModel,
    /// Reference covariate vector, aligned with `covariates`
    pub avg_covariates: Option<Vec<f64>>,
    pub adjustment: AdjustmentRule,
    #[serde(skip)]
    pub fit: FitConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            covariates: ["age", "female", "bmi", "thickness", "ulceration"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            weight_column: "yos".to_string(),
            stratify_by: "thickness".to_string(),
            lookback_days: None,
            model: OutcomeModel::Logistic,
            avg_covariates: None,
            adjustment: AdjustmentRule::Reference,
            fit: FitConfig::default(),
        }
    }
}

/// One practitioner's rate under one specification and one imputation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateEstimate {
    pub practitioner_id: String,
    /// Covariate-adjusted rate
    pub rate: f64,
    /// Unadjusted outcome frequency
    pub raw_rate: f64,
    /// Complete cases contributing to the fit
    pub cases: usize,
    pub method: String,
}

enum FittedModel {
    Logistic(LogisticFit),
    Linear(LinearFit),
    Constant,
}

impl FittedModel {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            FittedModel::Logistic(fit) => fit.predict_proba(row),
            FittedModel::Linear(fit) => fit.predict(row),
            FittedModel::Constant => 0.0,
        }
    }
}

/// Columns a unit needs that are absent from the table or imputed dataset.
pub fn missing_columns(
    table: &ProcedureTable,
    imputed: &ImputedDataset,
    spec: &ModelSpecification,
    config: &EstimatorConfig,
) -> Vec<String> {
    let mut missing = Vec::new();
    if table.outcome(&spec.outcome.column).is_none() {
        missing.push(spec.outcome.column.clone());
    }
    if let Some(flag) = &spec.outcome.prerequisite {
        if table.column(flag).is_none() {
            missing.push(flag.clone());
        }
    }
    for covariate in &config.covariates {
        if imputed.column(covariate).is_none() {
            missing.push(covariate.clone());
        }
    }
    if table.column(&config.stratify_by).is_none() {
        missing.push(config.stratify_by.clone());
    }
    missing
}

/// Estimate raw and adjusted rates for every practitioner with eligible cases.
///
/// # Errors
/// * [`RateError::MissingColumns`] - required columns absent (lists them)
/// * [`RateError::Misaligned`] - imputed dataset does not match the table rows
/// * [`RateError::NoWeightedRows`] - no eligible row has a weight value
/// * [`RateError::NoCompleteCases`] - nothing left after the complete-case filter
pub fn estimate_rates(
    table: &ProcedureTable,
    imputed: &ImputedDataset,
    spec: &ModelSpecification,
    config: &EstimatorConfig,
) -> Result<Vec<RateEstimate>, RateError> {
    let missing = missing_columns(table, imputed, spec, config);
    if !missing.is_empty() {
        return Err(RateError::MissingColumns(missing));
    }
    check_alignment(table, imputed)?;
    if let Some(avg) = &config.avg_covariates {
        if avg.len() != config.covariates.len() {
            return Err(RateError::Config(format!(
                "{} average covariate value(s) supplied for {} covariate(s)",
                avg.len(),
                config.covariates.len()
            )));
        }
    }

    let outcome = table
        .outcome(&spec.outcome.column)
        .ok_or_else(|| RateError::MissingColumns(vec![spec.outcome.column.clone()]))?;
    let covariates: Vec<&[f64]> = config
        .covariates
        .iter()
        .filter_map(|c| imputed.column(c))
        .collect();

    let eligible = spec.eligible_rows(table, &config.stratify_by, config.lookback_days);

    // Rows without a weight cannot be weighted, so they leave the analysis
    let weighted: Vec<(usize, f64)> = eligible
        .iter()
        .filter_map(|&i| table.weights[i].map(|w| (i, w)))
        .collect();
    if weighted.is_empty() {
        return Err(RateError::NoWeightedRows {
            column: config.weight_column.clone(),
        });
    }
    let raw_weights: Vec<f64> = weighted.iter().map(|(_, w)| *w).collect();
    let seniority = seniority_weights(&raw_weights)
        .map_err(|e| RateError::FitFailed(e.to_string()))?;

    let mut rows: Vec<usize> = Vec::new();
    let mut x: Vec<Vec<f64>> = Vec::new();
    let mut y: Vec<f64> = Vec::new();
    let mut w: Vec<f64> = Vec::new();
    for (&(i, _), &s) in weighted.iter().zip(seniority.iter()) {
        let Some(outcome_value) = outcome[i] else {
            continue;
        };
        let row: Vec<f64> = covariates.iter().map(|c| c[i]).collect();
        if row.iter().any(|v| !v.is_finite()) {
            continue;
        }
        rows.push(i);
        x.push(row);
        y.push(outcome_value);
        w.push(s);
    }
    if rows.is_empty() {
        return Err(RateError::NoCompleteCases);
    }

    let binary = y.iter().all(|&v| v == 0.0 || v == 1.0);
    let constant = y.iter().all(|&v| v == y[0]);

    let (model, method) = if constant {
        (FittedModel::Constant, CONSTANT_OUTCOME_METHOD)
    } else {
        match config.model {
            OutcomeModel::Logistic => {
                if !binary {
                    return Err(RateError::FitFailed(format!(
                        "logistic model needs a 0/1 outcome but '{}' has other values",
                        spec.outcome.column
                    )));
                }
                let fit_w = fit_weights(&w, &y);
                let fit = fit_logistic(&x, &y, &fit_w, &config.fit)?;
                if !fit.converged {
                    log::debug!(
                        "{}: logistic fit stopped after {} iterations without converging",
                        spec.model_id,
                        fit.iterations
                    );
                }
                (FittedModel::Logistic(fit), config.model.method_tag())
            }
            OutcomeModel::Linear => {
                let fit = fit_linear(&x, &y, &w, &config.fit)?;
                (FittedModel::Linear(fit), config.model.method_tag())
            }
        }
    };

    let reference = match (config.adjustment, &config.avg_covariates) {
        (_, Some(avg)) => Some(avg.clone()),
        (AdjustmentRule::ObservedExpected, None) => Some(column_means(&x)),
        (AdjustmentRule::Reference, None) => None,
    };
    let reference_prediction = reference.map(|r| {
        let p = model.predict(&r);
        if binary {
            p.clamp(0.0, 1.0)
        } else {
            p
        }
    });

    let mut by_practitioner: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (k, &i) in rows.iter().enumerate() {
        by_practitioner
            .entry(table.practitioner_ids[i].as_str())
            .or_default()
            .push(k);
    }

    let estimates = by_practitioner
        .into_iter()
        .map(|(practitioner, members)| {
            let cases = members.len();
            let raw_rate = members.iter().map(|&k| y[k]).sum::<f64>() / cases as f64;
            let rate = match (&model, config.adjustment, reference_prediction) {
                (FittedModel::Constant, _, _) | (_, _, None) => raw_rate,
                (_, AdjustmentRule::Reference, Some(p_ref)) => p_ref,
                (fitted, AdjustmentRule::ObservedExpected, Some(p_ref)) => {
                    let expected =
                        members.iter().map(|&k| fitted.predict(&x[k])).sum::<f64>() / cases as f64;
                    observed_expected(fitted, p_ref, raw_rate, expected, binary)
                }
            };

            RateEstimate {
                practitioner_id: practitioner.to_string(),
                rate,
                raw_rate,
                cases,
                method: method.to_string(),
            }
        })
        .collect();

    Ok(estimates)
}

fn observed_expected(model: &FittedModel, p_ref: f64, raw: f64, expected: f64, binary: bool) -> f64 {
    match model {
        FittedModel::Constant => raw,
        FittedModel::Logistic(_) => {
            if expected > 0.0 {
                (p_ref * raw / expected).clamp(0.0, 1.0)
            } else {
                raw
            }
        }
        FittedModel::Linear(_) => {
            let adjusted = p_ref + (raw - expected);
            if binary {
                adjusted.clamp(0.0, 1.0)
            } else {
                adjusted
            }
        }
    }
}

fn check_alignment(table: &ProcedureTable, imputed: &ImputedDataset) -> Result<(), RateError> {
    if imputed.n_rows() != table.len() {
        return Err(RateError::Misaligned {
            index: imputed.index,
            reason: format!("{} rows vs {} in the table", imputed.n_rows(), table.len()),
        });
    }
    if let Some(pos) = imputed
        .event_ids
        .iter()
        .zip(table.event_ids.iter())
        .position(|(a, b)| a != b)
    {
        return Err(RateError::Misaligned {
            index: imputed.index,
            reason: format!(
                "row {} holds event '{}' instead of '{}'",
                pos, imputed.event_ids[pos], table.event_ids[pos]
            ),
        });
    }
    for name in imputed.names() {
        if let Some(values) = imputed.column(name) {
            if values.len() != table.len() {
                return Err(RateError::Misaligned {
                    index: imputed.index,
                    reason: format!("column '{}' has {} values", name, values.len()),
                });
            }
        }
    }
    Ok(())
}

fn column_means(rows: &[Vec<f64>]) -> Vec<f64> {
    let ncols = rows.first().map_or(0, |r| r.len());
    let n = rows.len().max(1) as f64;
    (0..ncols)
        .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / n)
        .collect()
}
