//! Tests for model grid enumeration

use std::collections::HashSet;

use chrono::NaiveDate;
use surgrates::pipeline::{
    enumerate_for_dates, enumerate_models, ErrorKind, OutcomeCatalog, OutcomeDefinition, RateError,
    ThicknessBand,
};

#[path = "common/mod.rs"]
mod common;

use common::*;

#[test]
fn test_grid_is_outcomes_by_strata_by_dates() {
    let table = build_table(&create_procedure_dataframe());
    let specs = enumerate_models(&test_catalog(), &table).unwrap();

    assert_eq!(specs.len(), 3 * 4 * 2);
    assert_eq!(specs[0].model_id, "COMP.ANY.COMPGRADE2.ALLLENGTH.DATE20200115");
    assert_eq!(specs[1].model_id, "COMP.ANY.COMPGRADE2.ALLLENGTH.DATE20200630");
    assert_eq!(specs[2].model_id, "COMP.ANY.COMPGRADE2.LESSTHANPT8MM.DATE20200115");
    assert_eq!(specs.last().unwrap().model_id, "POSSLND.GRTHAN1MM.DATE20200630");

    let ids: HashSet<&str> = specs.iter().map(|s| s.model_id.as_str()).collect();
    assert_eq!(ids.len(), specs.len(), "identifiers are unique");
}

#[test]
fn test_row_permutation_keeps_identifier_set() {
    let df = create_procedure_dataframe();
    let reversed = df.reverse();

    let forward = enumerate_models(&test_catalog(), &build_table(&df)).unwrap();
    let backward = enumerate_models(&test_catalog(), &build_table(&reversed)).unwrap();

    let a: HashSet<String> = forward.into_iter().map(|s| s.model_id).collect();
    let b: HashSet<String> = backward.into_iter().map(|s| s.model_id).collect();
    assert_eq!(a, b);
}

#[test]
fn test_first_appearance_orders_dates() {
    let df = create_procedure_dataframe().reverse();
    let specs = enumerate_models(&test_catalog(), &build_table(&df)).unwrap();
    assert!(specs[0].model_id.ends_with("DATE20200630"));
}

#[test]
fn test_duplicate_identifiers_are_rejected() {
    let catalog = OutcomeCatalog::new(vec![
        OutcomeDefinition::new("SLND", "slnd"),
        OutcomeDefinition::new("SLND", "slnd"),
    ]);
    let dates = [NaiveDate::from_ymd_opt(2018, 1, 31).unwrap()];

    let err = enumerate_for_dates(&catalog, &dates).unwrap_err();
    assert!(matches!(err, RateError::DuplicateModel(ref id) if id == "SLND.ALLLENGTH.DATE20180131"));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_eligible_rows_use_observed_thickness_and_prerequisites() {
    let table = build_table(&create_procedure_dataframe());
    let specs = enumerate_models(&test_catalog(), &table).unwrap();
    let find = |id: &str| specs.iter().find(|s| s.model_id == id).unwrap();

    // Cumulative window through the second date, 0.8-1.0mm band
    let band = find("COMP.ANY.COMPGRADE2.PT8MMTO1MM.DATE20200630");
    assert_eq!(band.stratum, ThicknessBand::Pt8To1);
    assert_eq!(band.eligible_rows(&table, "thickness", None), vec![8, 12]);

    // Nothing in that band on the first date
    let empty = find("COMP.ANY.COMPGRADE2.PT8MMTO1MM.DATE20200115");
    assert!(empty.eligible_rows(&table, "thickness", None).is_empty());

    // Unknown thickness only counts towards ALLLENGTH
    let all = find("COMP.ANY.COMPGRADE2.ALLLENGTH.DATE20200630");
    assert_eq!(all.eligible_rows(&table, "thickness", None).len(), 16);

    // Positive SLND needs slnd == 1
    let pos = find("POSSLND.ALLLENGTH.DATE20200115");
    assert_eq!(pos.eligible_rows(&table, "thickness", None), vec![1, 3, 4, 6]);
}

#[test]
fn test_lookback_restricts_window() {
    let table = build_table(&create_procedure_dataframe());
    let specs = enumerate_models(&test_catalog(), &table).unwrap();
    let spec = specs
        .iter()
        .find(|s| s.model_id == "COMP.ANY.COMPGRADE2.ALLLENGTH.DATE20200630")
        .unwrap();

    // 2020-01-15 is 167 days before 2020-06-30
    assert_eq!(spec.eligible_rows(&table, "thickness", Some(167)).len(), 8);
    assert_eq!(spec.eligible_rows(&table, "thickness", Some(168)).len(), 16);
}

#[test]
fn test_melanoma_catalog_full_grid() {
    let dates = [
        NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
    ];
    let specs = enumerate_for_dates(&OutcomeCatalog::melanoma(), &dates).unwrap();
    assert_eq!(specs.len(), 13 * 4 * 2);
    assert!(specs
        .iter()
        .any(|s| s.model_id == "CLND.GRTHAN1MM.DATE20180101"
            && s.outcome.prerequisite.as_deref() == Some("posSlnd")));
}
