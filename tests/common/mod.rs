//! Shared test utilities and fixture generators
#![allow(dead_code)]

use polars::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

use surgrates::pipeline::{
    ComplicationType, ImputationConfig, OutcomeCatalog, OutcomeDefinition, PipelineConfig,
    ProcedureSchema, ProcedureTable,
};

/// Schema for the small fixtures: default column names, three outcomes
pub fn test_schema() -> ProcedureSchema {
    ProcedureSchema {
        outcomes: vec!["anyComp2".into(), "slnd".into(), "posSlnd".into()],
        ..Default::default()
    }
}

/// Any grade-2 complication, SLND and positive SLND (requires SLND)
pub fn test_catalog() -> OutcomeCatalog {
    OutcomeCatalog::new(vec![
        OutcomeDefinition::complication(ComplicationType::Any, 2),
        OutcomeDefinition::new("SLND", "slnd"),
        OutcomeDefinition::new("POSSLND", "posSlnd").requiring("slnd"),
    ])
}

/// Pipeline configuration over the small fixtures with a fixed seed
pub fn test_config(n_imputations: usize) -> PipelineConfig {
    PipelineConfig {
        imputation: ImputationConfig {
            n_imputations,
            seed: Some(42),
            ..Default::default()
        },
        catalog: test_catalog(),
        as_of: chrono::NaiveDate::from_ymd_opt(2020, 12, 31),
        ..Default::default()
    }
}

/// Sixteen procedures by three surgeons on two dates.
///
/// - `bmi`: 3 missing
/// - `thickness`: missing for EV04 and EV11, spread across all bands otherwise
/// - no procedure falls in the 0.8-1.0mm band on the first date
/// - `anyComp2` varies within every surgeon
pub fn create_procedure_dataframe() -> DataFrame {
    df! {
        "eventId" => (1..=16).map(|i| format!("EV{:02}", i)).collect::<Vec<_>>(),
        "userId" => ["ARIYAN", "BRADY", "COIT", "ARIYAN", "BRADY", "COIT", "ARIYAN", "BRADY",
                     "COIT", "ARIYAN", "BRADY", "COIT", "ARIYAN", "BRADY", "COIT", "ARIYAN"],
        "surgDate" => ["2020-01-15", "2020-01-15", "2020-01-15", "2020-01-15", "2020-01-15",
                       "2020-01-15", "2020-01-15", "2020-01-15", "2020-06-30", "2020-06-30",
                       "2020-06-30", "2020-06-30", "2020-06-30", "2020-06-30", "2020-06-30",
                       "2020-06-30"],
        "yos" => [2010i64, 2015, 2018, 2010, 2015, 2018, 2010, 2015, 2018, 2010, 2015, 2018,
                  2010, 2015, 2018, 2010],
        "age" => [45.0f64, 62.0, 71.0, 55.0, 38.0, 80.0, 66.0, 59.0, 49.0, 73.0, 52.0, 61.0,
                  68.0, 44.0, 57.0, 75.0],
        "female" => [1.0f64, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0,
                     0.0, 1.0],
        "bmi" => [Some(24.0f64), Some(31.5), None, Some(27.2), Some(22.8), Some(29.9), None,
                  Some(26.1), Some(33.0), Some(25.4), Some(28.8), None, Some(23.5), Some(30.2),
                  Some(27.7), Some(26.6)],
        "thickness" => [Some(0.4f64), Some(1.8), Some(0.6), None, Some(2.5), Some(0.3), Some(1.2),
                        Some(0.5), Some(0.9), Some(3.1), None, Some(0.7), Some(0.85), Some(1.5),
                        Some(0.2), Some(4.0)],
        "ulceration" => [0.0f64, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0,
                         0.0, 1.0],
        "anyComp2" => [0i32, 1, 0, 1, 0, 0, 1, 0, 1, 0, 0, 1, 0, 1, 0, 0],
        "slnd" => [Some(0i32), Some(1), Some(0), Some(1), Some(1), Some(0), Some(1), None,
                   Some(1), Some(1), Some(0), Some(0), Some(1), Some(1), None, Some(1)],
        "posSlnd" => [Some(0i32), Some(1), Some(0), Some(0), Some(0), Some(0), Some(1), None,
                      Some(0), Some(1), Some(0), Some(0), Some(0), Some(1), None, Some(0)],
    }
    .unwrap()
}

/// Ten procedures by two surgeons, identical covariates and seniority.
///
/// Surgeon A has 2 of 5 complications, surgeon B 1 of 5.
pub fn create_constant_covariate_dataframe() -> DataFrame {
    df! {
        "eventId" => (1..=10).map(|i| format!("C{:02}", i)).collect::<Vec<_>>(),
        "userId" => ["A", "A", "A", "A", "A", "B", "B", "B", "B", "B"],
        "surgDate" => ["2019-05-01"; 10],
        "yos" => [2012i64; 10],
        "age" => [60.0f64; 10],
        "female" => [1.0f64; 10],
        "bmi" => [27.0f64; 10],
        "thickness" => [0.5f64; 10],
        "ulceration" => [0.0f64; 10],
        "anyComp2" => [1i32, 1, 0, 0, 0, 1, 0, 0, 0, 0],
        "slnd" => [0i32; 10],
        "posSlnd" => [0i32; 10],
    }
    .unwrap()
}

/// Ten procedures by two surgeons with the same seniority but different case mix.
///
/// Age, BMI and thickness vary; `bmi` is missing for C03 and C08. Surgeon A has
/// 2 of 5 complications, surgeon B 1 of 5. Every row is in the 0.8-1.0mm band
/// or above it, never below.
pub fn create_varying_covariate_dataframe() -> DataFrame {
    df! {
        "eventId" => (1..=10).map(|i| format!("C{:02}", i)).collect::<Vec<_>>(),
        "userId" => ["A", "A", "A", "A", "A", "B", "B", "B", "B", "B"],
        "surgDate" => ["2019-05-01"; 10],
        "yos" => [2012i64; 10],
        "age" => [72.0f64, 64.0, 58.0, 81.0, 49.0, 41.0, 55.0, 63.0, 37.0, 68.0],
        "female" => [0.0f64, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0],
        "bmi" => [Some(31.0f64), Some(28.5), None, Some(34.2), Some(26.0), Some(22.4),
                  Some(24.9), None, Some(21.7), Some(29.3)],
        "thickness" => [2.4f64, 1.6, 0.9, 3.8, 1.1, 0.85, 1.3, 0.95, 2.0, 1.7],
        "ulceration" => [1.0f64, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        "anyComp2" => [1i32, 0, 0, 1, 0, 0, 0, 1, 0, 0],
        "slnd" => [1i32, 1, 0, 1, 1, 0, 1, 0, 1, 1],
        "posSlnd" => [0i32; 10],
    }
    .unwrap()
}

/// Build a table from a fixture frame with the test schema
pub fn build_table(df: &DataFrame) -> ProcedureTable {
    ProcedureTable::from_frame(df, &test_schema(), None).unwrap()
}

/// Helper to create a temporary CSV file from a DataFrame
pub fn create_temp_csv(df: &mut DataFrame) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let csv_path = temp_dir.path().join("procedures.csv");

    let mut file = std::fs::File::create(&csv_path).unwrap();
    CsvWriter::new(&mut file).finish(df).unwrap();

    (temp_dir, csv_path)
}

/// Helper to create a temporary Parquet file from a DataFrame
pub fn create_temp_parquet(df: &mut DataFrame) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let parquet_path = temp_dir.path().join("procedures.parquet");

    let file = std::fs::File::create(&parquet_path).unwrap();
    ParquetWriter::new(file).finish(df).unwrap();

    (temp_dir, parquet_path)
}
