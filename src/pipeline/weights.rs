//! Model weight derivation
//!
//! Two weights multiply into each row's contribution to the outcome fit: the
//! seniority weight derived from the weighting column, and a class-balance
//! weight so rare outcomes are not swamped by the majority class.

use anyhow::{bail, Result};

/// Seniority weights `1 / sqrt(max - w + 1)` for each row.
///
/// The row holding the maximum value gets weight 1.0; every unit below the
/// maximum shrinks the weight.
///
/// # Returns
/// * `Ok(Vec<f64>)` - One weight per input value
/// * `Err` - If the input is empty or contains NaN/infinite values
pub fn seniority_weights(values: &[f64]) -> Result<Vec<f64>> {
    if values.is_empty() {
        bail!("Cannot derive seniority weights from an empty column");
    }

    for &v in values {
        if v.is_nan() {
            bail!("Weight column contains NaN value. All weights must be valid numbers.");
        }
        if v.is_infinite() {
            bail!("Weight column contains infinite value. All weights must be finite.");
        }
    }

    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(values.iter().map(|&v| 1.0 / (max - v + 1.0).sqrt()).collect())
}

/// Balanced class weights `n / (2 * n_class)` for a 0/1 outcome.
///
/// Returns `(weight_for_0, weight_for_1)`. A class that never occurs gets
/// weight 0.0.
pub fn balanced_class_weights(outcome: &[f64]) -> (f64, f64) {
    let n = outcome.len() as f64;
    let events = outcome.iter().filter(|&&y| y >= 0.5).count() as f64;
    let non_events = n - events;

    let weight = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 0.0 };
    (weight(non_events), weight(events))
}

/// Combine seniority weights with class-balance weights per row.
pub fn fit_weights(seniority: &[f64], outcome: &[f64]) -> Vec<f64> {
    let (w0, w1) = balanced_class_weights(outcome);
    seniority
        .iter()
        .zip(outcome.iter())
        .map(|(&s, &y)| if y >= 0.5 { s * w1 } else { s * w0 })
        .collect()
}

/// Calculate the total weight (sum of all weights).
#[inline]
pub fn total_weight(weights: &[f64]) -> f64 {
    weights.iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_most_senior_row_gets_unit_weight() {
        let weights = seniority_weights(&[2010.0, 2015.0, 2018.0]).unwrap();
        assert_relative_eq!(weights[2], 1.0);
        assert_relative_eq!(weights[1], 1.0 / 4.0_f64.sqrt());
        assert_relative_eq!(weights[0], 1.0 / 9.0_f64.sqrt());
    }

    #[test]
    fn test_constant_column_gives_equal_weights() {
        let weights = seniority_weights(&[7.0; 4]).unwrap();
        assert!(weights.iter().all(|&w| (w - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_empty_weights_error() {
        let result = seniority_weights(&[]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_nan_weight_errors() {
        let result = seniority_weights(&[1.0, f64::NAN]);
        assert!(result.unwrap_err().to_string().contains("NaN"));
    }

    #[test]
    fn test_infinite_weight_errors() {
        let result = seniority_weights(&[1.0, f64::INFINITY]);
        assert!(result.unwrap_err().to_string().contains("infinite"));
    }

    #[test]
    fn test_balanced_classes_sum_equally() {
        let y = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let (w0, w1) = balanced_class_weights(&y);
        assert_relative_eq!(w0 * 9.0, w1 * 1.0);
        assert_relative_eq!(w0 * 9.0 + w1, 10.0);
    }

    #[test]
    fn test_single_class_gets_zero_for_absent_class() {
        let (w0, w1) = balanced_class_weights(&[0.0, 0.0]);
        assert_relative_eq!(w0, 1.0);
        assert_relative_eq!(w1, 0.0);
    }

    #[test]
    fn test_fit_weights_multiply() {
        let w = fit_weights(&[1.0, 0.5, 1.0, 1.0], &[1.0, 0.0, 0.0, 0.0]);
        assert_relative_eq!(w[0], 2.0);
        assert_relative_eq!(w[1], 0.5 * 4.0 / 6.0);
        assert_relative_eq!(total_weight(&w[2..]), 2.0 * 4.0 / 6.0);
    }
}
