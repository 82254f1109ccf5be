//! Tests for multiple imputation of missing covariates

use surgrates::pipeline::{
    validate_imputations, ErrorKind, ImputationConfig, ImputedDataset, MultipleImputer, RateError,
};

#[path = "common/mod.rs"]
mod common;

use common::*;

fn covariates() -> Vec<String> {
    ["age", "female", "bmi", "thickness", "ulceration"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn imputer(k: usize, seed: Option<u64>) -> MultipleImputer {
    MultipleImputer::new(ImputationConfig {
        n_imputations: k,
        seed,
        ..Default::default()
    })
}

#[test]
fn test_produces_k_aligned_complete_tables() {
    let table = build_table(&create_procedure_dataframe());
    let imputed = imputer(5, Some(1)).impute(&table, &covariates()).unwrap();

    assert_eq!(imputed.len(), 5);
    for (k, dataset) in imputed.iter().enumerate() {
        assert_eq!(dataset.index, k);
        assert_eq!(dataset.event_ids, table.event_ids, "rows stay aligned by event");
        assert_eq!(dataset.shape(), (16, 6), "covariates plus the identifier");
        for name in covariates() {
            let values = dataset.column(&name).unwrap();
            assert!(values.iter().all(|v| v.is_finite()), "{name} still has gaps");
        }
    }
}

#[test]
fn test_observed_values_are_untouched() {
    let table = build_table(&create_procedure_dataframe());
    let imputed = imputer(3, Some(2)).impute(&table, &covariates()).unwrap();

    for dataset in &imputed {
        for name in covariates() {
            let original = table.covariate(&name).unwrap();
            let completed = dataset.column(&name).unwrap();
            for (o, c) in original.iter().zip(completed.iter()) {
                if let Some(o) = o {
                    assert_eq!(o, c, "observed {name} changed");
                }
            }
        }
    }
}

#[test]
fn test_completions_differ_between_imputations() {
    let table = build_table(&create_procedure_dataframe());
    let imputed = imputer(5, Some(3)).impute(&table, &covariates()).unwrap();

    // bmi is missing on EV03, EV07 and EV12
    let draws: Vec<Vec<f64>> = imputed
        .iter()
        .map(|d| {
            let bmi = d.column("bmi").unwrap();
            vec![bmi[2], bmi[6], bmi[11]]
        })
        .collect();
    let distinct = draws
        .iter()
        .enumerate()
        .any(|(i, a)| draws[i + 1..].iter().any(|b| a != b));
    assert!(distinct, "stochastic draws should differ across imputations");
}

#[test]
fn test_imputed_values_stay_in_observed_range() {
    let table = build_table(&create_procedure_dataframe());
    let imputed = imputer(5, Some(4)).impute(&table, &covariates()).unwrap();

    for dataset in &imputed {
        let thickness = dataset.column("thickness").unwrap();
        for idx in [3, 10] {
            assert!(
                (0.2..=4.0).contains(&thickness[idx]),
                "thickness draw {} outside observed range",
                thickness[idx]
            );
        }
    }
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let table = build_table(&create_procedure_dataframe());
    let first = imputer(3, Some(99)).impute(&table, &covariates()).unwrap();
    let second = imputer(3, Some(99)).impute(&table, &covariates()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_unknown_covariate_is_rejected() {
    let table = build_table(&create_procedure_dataframe());
    let mut vars = covariates();
    vars.push("mitoticIndex".to_string());

    let err = imputer(2, Some(5)).impute(&table, &vars).unwrap_err();
    assert!(matches!(err, RateError::MissingColumns(ref cols) if cols == &vec!["mitoticIndex".to_string()]));
}

#[test]
fn test_zero_imputations_is_a_config_error() {
    let table = build_table(&create_procedure_dataframe());
    let err = imputer(0, None).impute(&table, &covariates()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_validation_passes_on_real_completions() {
    let table = build_table(&create_procedure_dataframe());
    let imputed = imputer(5, Some(6)).impute(&table, &covariates()).unwrap();
    validate_imputations(&table, &imputed, &covariates()).unwrap();
}

#[test]
fn test_validation_catches_shifted_completion() {
    let table = build_table(&create_procedure_dataframe());
    let mut imputed = imputer(3, Some(7)).impute(&table, &covariates()).unwrap();

    // Replace the second completion with one whose age is shifted far away
    let shifted: Vec<(String, Vec<f64>)> = covariates()
        .into_iter()
        .map(|name| {
            let mut values = imputed[1].column(&name).unwrap().to_vec();
            if name == "age" {
                values.iter_mut().for_each(|v| *v += 100.0);
            }
            (name, values)
        })
        .collect();
    imputed[1] = ImputedDataset::new(1, table.event_ids.clone(), shifted);

    let err = validate_imputations(&table, &imputed, &covariates()).unwrap_err();
    match err {
        RateError::ImputationSanity { ref variable, index, .. } => {
            assert_eq!(variable, "age");
            assert_eq!(index, 1);
        }
        other => panic!("expected ImputationSanity, got {other:?}"),
    }
}

#[test]
fn test_validation_catches_shape_mismatch() {
    let table = build_table(&create_procedure_dataframe());
    let mut imputed = imputer(2, Some(8)).impute(&table, &covariates()).unwrap();
    imputed[0] = ImputedDataset::new(0, vec!["EV01".into()], vec![("age".into(), vec![45.0])]);

    let err = validate_imputations(&table, &imputed, &covariates()).unwrap_err();
    assert!(matches!(err, RateError::ShapeMismatch(_)));
    assert_eq!(err.kind(), ErrorKind::ImputationSanity);
}
