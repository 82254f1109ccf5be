//! Pooling of per-imputation rate tables
//!
//! Point estimates are the arithmetic mean across imputations. When asked,
//! Rubin's rules variance components are reported next to them.

use std::collections::BTreeMap;

use serde::Serialize;

use super::estimator::RateEstimate;

/// Rubin's rules variance components for one pooled rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PooledVariance {
    /// Mean of the binomial sampling variances `rate * (1 - rate) / cases`
    pub within: f64,
    /// Sample variance of the per-imputation rates
    pub between: f64,
    /// `within + (1 + 1/m) * between`
    pub total: f64,
}

/// A practitioner's rate combined across imputations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PooledRateEstimate {
    pub practitioner_id: String,
    pub rate: f64,
    pub raw_rate: f64,
    /// Case count from the first table the practitioner appears in
    pub cases: usize,
    pub method: String,
    /// Number of tables the practitioner appears in
    pub imputations: usize,
    pub variance: Option<PooledVariance>,
}

#[derive(Default)]
struct Group<'a> {
    first: Option<&'a RateEstimate>,
    rates: Vec<f64>,
    raw_rates: Vec<f64>,
    within: Vec<f64>,
}

/// Combine per-imputation tables into one row per practitioner.
///
/// Tables from failed imputations are simply left out of `tables`. Output is
/// sorted by practitioner. An empty input yields an empty result.
pub fn pool_estimates(tables: &[Vec<RateEstimate>], with_variance: bool) -> Vec<PooledRateEstimate> {
    let mut groups: BTreeMap<&str, Group> = BTreeMap::new();

    for table in tables {
        for estimate in table {
            let group = groups.entry(estimate.practitioner_id.as_str()).or_default();
            group.first.get_or_insert(estimate);
            group.rates.push(estimate.rate);
            group.raw_rates.push(estimate.raw_rate);
            if estimate.cases > 0 {
                group
                    .within
                    .push(estimate.rate * (1.0 - estimate.rate) / estimate.cases as f64);
            }
        }
    }

    groups
        .into_iter()
        .filter_map(|(practitioner, group)| {
            let first = group.first?;
            let m = group.rates.len();
            let rate = mean(&group.rates);
            let variance = with_variance.then(|| {
                let within = mean(&group.within);
                let between = sample_variance(&group.rates, rate);
                PooledVariance {
                    within,
                    between,
                    total: within + (1.0 + 1.0 / m as f64) * between,
                }
            });
            Some(PooledRateEstimate {
                practitioner_id: practitioner.to_string(),
                rate,
                raw_rate: mean(&group.raw_rates),
                cases: first.cases,
                method: first.method.clone(),
                imputations: m,
                variance,
            })
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}
