//! Covariate missingness diagnostics

use anyhow::Result;

use super::loader::ProcedureTable;
use super::weights::total_weight;

/// Missing count and ratio of one covariate
#[derive(Debug, Clone, PartialEq)]
pub struct MissingProfile {
    pub name: String,
    pub missing: usize,
    pub ratio: f64,
}

/// Analyze missing values in the table's covariates with optional row weights.
///
/// When weights are provided, calculates the weighted missing ratio:
/// `weighted_null_count / total_weight` instead of `null_count / row_count`.
/// Rows without a weight count as weight 1.0 in the weighted ratio.
///
/// # Arguments
/// * `table` - Procedure table as loaded
/// * `weighted` - Use the seniority column as row weights
pub fn analyze_missing_covariates(table: &ProcedureTable, weighted: bool) -> Result<Vec<MissingProfile>> {
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let weights: Vec<f64> = if weighted {
        table.weights.iter().map(|w| w.unwrap_or(1.0)).collect()
    } else {
        vec![1.0; table.len()]
    };
    let total = total_weight(&weights);
    if total <= 0.0 {
        anyhow::bail!("Total weight is zero - cannot compute missing ratios");
    }

    let mut profiles: Vec<MissingProfile> = table
        .covariate_columns()
        .iter()
        .map(|column| {
            let weighted_nulls: f64 = column
                .values
                .iter()
                .zip(weights.iter())
                .filter_map(|(v, &w)| v.is_none().then_some(w))
                .sum();
            MissingProfile {
                name: column.name.clone(),
                missing: column.null_count(),
                ratio: weighted_nulls / total,
            }
        })
        .collect();

    // Sort by missing ratio descending
    profiles.sort_by(|a, b| b.ratio.partial_cmp(&a.ratio).unwrap_or(std::cmp::Ordering::Equal));

    Ok(profiles)
}

/// Covariates whose missing ratio exceeds `threshold`
pub fn covariates_above_threshold(profiles: &[MissingProfile], threshold: f64) -> Vec<String> {
    profiles
        .iter()
        .filter(|p| p.ratio > threshold)
        .map(|p| p.name.clone())
        .collect()
}

/// Covariates with at least one gap, i.e. the ones the imputer will fill
pub fn covariates_needing_imputation(profiles: &[MissingProfile]) -> Vec<String> {
    profiles
        .iter()
        .filter(|p| p.missing > 0)
        .map(|p| p.name.clone())
        .collect()
}
