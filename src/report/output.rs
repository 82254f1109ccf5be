//! Rate table output
//!
//! The full table carries every pooled column; the trimmed table keeps the
//! columns downstream consumers read and drops thinly supported rows.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use polars::prelude::*;

use crate::pipeline::{parse_procedure_date, SurgeonRate};

/// File name of the full output table
pub const FULL_RATES_FILE: &str = "SurgeonRates_full.csv";

/// File name of the trimmed output table
pub const TRIMMED_RATES_FILE: &str = "SurgeonRates.csv";

/// Columns kept in the trimmed table, in output order
pub const TRIMMED_COLUMNS: [&str; 5] = ["surgeon_id", "model_id", "rate", "cases", "date"];

/// Which rows survive into the trimmed table
#[derive(Debug, Clone, Copy)]
pub struct TrimPolicy {
    /// Minimum pooled case count
    pub min_cases: usize,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self { min_cases: 1 }
    }
}

/// Where [`save_results`] wrote its files
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub full: PathBuf,
    pub trimmed: PathBuf,
}

/// Build the full output frame.
///
/// Variance columns are included only when `with_variance` is set.
pub fn rates_to_frame(rates: &[SurgeonRate], with_variance: bool) -> Result<DataFrame> {
    let mut df = df!(
        "surgeon_id" => rates.iter().map(|r| r.surgeon_id.clone()).collect::<Vec<_>>(),
        "rate" => rates.iter().map(|r| r.rate).collect::<Vec<_>>(),
        "raw_rate" => rates.iter().map(|r| r.raw_rate).collect::<Vec<_>>(),
        "cases" => rates.iter().map(|r| r.cases as i64).collect::<Vec<_>>(),
        "method" => rates.iter().map(|r| r.method.clone()).collect::<Vec<_>>(),
        "model_id" => rates.iter().map(|r| r.model_id.clone()).collect::<Vec<_>>(),
        "date" => rates.iter().map(|r| r.date.format("%Y-%m-%d").to_string()).collect::<Vec<_>>(),
        "imputations" => rates.iter().map(|r| r.imputations as i64).collect::<Vec<_>>(),
    )
    .context("Failed to build the rate table")?;

    if with_variance {
        df.with_column(Column::new(
            "between_variance".into(),
            rates.iter().map(|r| r.between_variance).collect::<Vec<_>>(),
        ))?;
        df.with_column(Column::new(
            "total_variance".into(),
            rates.iter().map(|r| r.total_variance).collect::<Vec<_>>(),
        ))?;
    }

    Ok(df)
}

/// Apply the trim policy to a full rate frame.
pub fn trim_rates(full: &DataFrame, policy: &TrimPolicy) -> Result<DataFrame> {
    let columns: Vec<Expr> = TRIMMED_COLUMNS.iter().map(|c| col(*c)).collect();
    full.clone()
        .lazy()
        .filter(col("cases").gt_eq(lit(policy.min_cases as i64)))
        .select(columns)
        .collect()
        .context("Failed to build the trimmed rate table")
}

/// Write a frame as CSV.
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    CsvWriter::new(&mut file)
        .finish(df)
        .with_context(|| format!("Failed to write CSV file: {}", path.display()))?;
    Ok(())
}

/// Write the full and trimmed tables into `dir`.
pub fn save_results(
    rates: &[SurgeonRate],
    dir: &Path,
    policy: &TrimPolicy,
    with_variance: bool,
) -> Result<OutputPaths> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let paths = OutputPaths {
        full: dir.join(FULL_RATES_FILE),
        trimmed: dir.join(TRIMMED_RATES_FILE),
    };

    let mut full = rates_to_frame(rates, with_variance)?;
    let mut trimmed = trim_rates(&full, policy)?;
    write_csv(&mut full, &paths.full)?;
    write_csv(&mut trimmed, &paths.trimmed)?;

    Ok(paths)
}

/// Read a full rate table written by [`save_results`].
pub fn read_rates(path: &Path) -> Result<Vec<SurgeonRate>> {
    let df = LazyCsvReader::new(path)
        .with_infer_schema_length(None)
        .finish()
        .and_then(|lf| lf.collect())
        .with_context(|| format!("Failed to read rate table: {}", path.display()))?;

    let surgeons = strings(&df, "surgeon_id")?;
    let methods = strings(&df, "method")?;
    let models = strings(&df, "model_id")?;
    let dates = strings(&df, "date")?;
    let rates = floats(&df, "rate")?;
    let raw_rates = floats(&df, "raw_rate")?;
    let cases = floats(&df, "cases")?;
    let imputations = floats(&df, "imputations")?;
    let between = optional_floats(&df, "between_variance")?;
    let total = optional_floats(&df, "total_variance")?;

    (0..df.height())
        .map(|i| {
            let date: NaiveDate = parse_procedure_date(&dates[i])
                .with_context(|| format!("Invalid date '{}' in row {}", dates[i], i))?;
            Ok(SurgeonRate {
                surgeon_id: surgeons[i].clone(),
                rate: rates[i].unwrap_or(f64::NAN),
                raw_rate: raw_rates[i].unwrap_or(f64::NAN),
                cases: cases[i].unwrap_or(0.0) as usize,
                method: methods[i].clone(),
                model_id: models[i].clone(),
                date,
                imputations: imputations[i].unwrap_or(0.0) as usize,
                between_variance: between.as_ref().and_then(|v| v[i]),
                total_variance: total.as_ref().and_then(|v| v[i]),
            })
        })
        .collect()
}

fn strings(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let column = df
        .column(name)
        .with_context(|| format!("Rate table has no '{}' column", name))?
        .cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

fn floats(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .with_context(|| format!("Rate table has no '{}' column", name))?
        .cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

fn optional_floats(df: &DataFrame, name: &str) -> Result<Option<Vec<Option<f64>>>> {
    if df.get_column_index(name).is_none() {
        return Ok(None);
    }
    floats(df, name).map(Some)
}
