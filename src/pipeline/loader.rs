//! Procedure table loader for CSV and Parquet files
//!
//! Reads the flat procedure extract with polars, checks that every column the
//! pipeline needs is present and coerces it into a [`ProcedureTable`].
//! Numeric fields are cast non-strictly, so unparseable values become missing
//! rather than failing the row.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::warn;
use polars::prelude::*;
use serde::Serialize;

use super::enumerator::OutcomeCatalog;
use super::error::RateError;

/// Column names of the procedure extract.
#[derive(Debug, Clone, Serialize)]
pub struct ProcedureSchema {
    /// Unique event (patient-procedure) identifier
    pub event_id: String,
    /// Practitioner identifier; must never be missing
    pub practitioner_id: String,
    /// Procedure date (ISO `YYYY-MM-DD`)
    pub date: String,
    /// Seniority measure used to derive model weights
    pub weight: String,
    /// Covariates used for adjustment and imputation
    pub covariates: Vec<String>,
    /// Column tested by the severity strata
    pub stratify_by: String,
    /// Outcome and prerequisite flag columns
    pub outcomes: Vec<String>,
}

impl Default for ProcedureSchema {
    fn default() -> Self {
        Self {
            event_id: "eventId".to_string(),
            practitioner_id: "userId".to_string(),
            date: "surgDate".to_string(),
            weight: "yos".to_string(),
            covariates: ["age", "female", "bmi", "thickness", "ulceration"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            stratify_by: "thickness".to_string(),
            outcomes: OutcomeCatalog::melanoma().columns(),
        }
    }
}

impl ProcedureSchema {
    /// Every column the loader requires, in schema order.
    pub fn required_columns(&self) -> Vec<String> {
        let mut cols = vec![
            self.event_id.clone(),
            self.practitioner_id.clone(),
            self.date.clone(),
            self.weight.clone(),
        ];
        cols.extend(self.covariates.iter().cloned());
        cols.extend(self.outcomes.iter().cloned());
        if !cols.contains(&self.stratify_by) {
            cols.push(self.stratify_by.clone());
        }
        cols
    }
}

/// A named numeric column with missing values.
#[derive(Debug, Clone)]
pub struct NumericColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl NumericColumn {
    /// Number of missing entries
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Procedure records after type coercion. Read-only for the whole run.
#[derive(Debug, Clone)]
pub struct ProcedureTable {
    pub event_ids: Vec<String>,
    pub practitioner_ids: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub weights: Vec<Option<f64>>,
    covariates: Vec<NumericColumn>,
    outcomes: Vec<NumericColumn>,
}

impl ProcedureTable {
    /// Build the table from a collected DataFrame.
    ///
    /// Rows without a parseable date are dropped with a warning, as are rows
    /// dated after `last_date` when a cutoff is given.
    pub fn from_frame(
        df: &DataFrame,
        schema: &ProcedureSchema,
        last_date: Option<NaiveDate>,
    ) -> Result<Self, RateError> {
        let present: HashSet<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut missing: Vec<String> = Vec::new();
        for col in schema.required_columns() {
            if !present.contains(&col) && !missing.contains(&col) {
                missing.push(col);
            }
        }
        if !missing.is_empty() {
            return Err(RateError::MissingColumns(missing));
        }

        let event_ids = string_values(df, &schema.event_id)?;
        let practitioner_ids = string_values(df, &schema.practitioner_id)?;
        let raw_dates = string_values(df, &schema.date)?;

        let missing_events = event_ids.iter().filter(|v| v.is_none()).count();
        if missing_events > 0 {
            return Err(RateError::MissingEventId {
                column: schema.event_id.clone(),
                count: missing_events,
            });
        }
        let event_ids: Vec<String> = event_ids.into_iter().flatten().collect();

        let missing_practitioners = practitioner_ids.iter().filter(|v| v.is_none()).count();
        if missing_practitioners > 0 {
            return Err(RateError::MissingPractitioner {
                column: schema.practitioner_id.clone(),
                count: missing_practitioners,
            });
        }

        // Decide which rows survive before touching the numeric columns
        let mut keep: Vec<usize> = Vec::with_capacity(df.height());
        let mut dates: Vec<NaiveDate> = Vec::with_capacity(df.height());
        let mut undated = 0usize;
        let mut after_cutoff = 0usize;
        for (idx, raw) in raw_dates.iter().enumerate() {
            match raw.as_deref().and_then(parse_procedure_date) {
                Some(date) if last_date.map_or(true, |cutoff| date <= cutoff) => {
                    keep.push(idx);
                    dates.push(date);
                }
                Some(_) => after_cutoff += 1,
                None => undated += 1,
            }
        }
        if undated > 0 {
            warn!(
                "Dropped {} row(s) with a missing or unparseable '{}' value",
                undated, schema.date
            );
        }
        if after_cutoff > 0 {
            log::info!("Excluded {} row(s) dated after the cutoff", after_cutoff);
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(keep.len());
        let mut kept_events = Vec::with_capacity(keep.len());
        for &idx in &keep {
            let event = event_ids[idx].as_str();
            if !seen.insert(event) {
                return Err(RateError::DuplicateEvent {
                    event_id: event.to_string(),
                });
            }
            kept_events.push(event.to_string());
        }

        let kept_practitioners = keep
            .iter()
            .map(|&idx| practitioner_ids[idx].clone().unwrap_or_default())
            .collect();

        let weights = select(&numeric_values(df, &schema.weight)?, &keep);

        let mut covariates = Vec::with_capacity(schema.covariates.len());
        for name in &schema.covariates {
            covariates.push(NumericColumn {
                name: name.clone(),
                values: select(&numeric_values(df, name)?, &keep),
            });
        }

        let mut outcomes = Vec::with_capacity(schema.outcomes.len());
        let mut extra = schema.outcomes.clone();
        if !schema.covariates.contains(&schema.stratify_by) && !extra.contains(&schema.stratify_by)
        {
            extra.push(schema.stratify_by.clone());
        }
        for name in &extra {
            outcomes.push(NumericColumn {
                name: name.clone(),
                values: select(&numeric_values(df, name)?, &keep),
            });
        }

        Ok(Self {
            event_ids: kept_events,
            practitioner_ids: kept_practitioners,
            dates,
            weights,
            covariates,
            outcomes,
        })
    }

    /// Number of procedure rows
    pub fn len(&self) -> usize {
        self.event_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }

    /// Observed values of a covariate
    pub fn covariate(&self, name: &str) -> Option<&[Option<f64>]> {
        self.covariates
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Values of an outcome or flag column
    pub fn outcome(&self, name: &str) -> Option<&[Option<f64>]> {
        self.outcomes
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Any numeric column, covariates first.
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.covariate(name).or_else(|| self.outcome(name))
    }

    pub fn covariate_columns(&self) -> &[NumericColumn] {
        &self.covariates
    }

    /// Distinct procedure dates in order of first appearance
    pub fn distinct_dates(&self) -> Vec<NaiveDate> {
        let mut seen = HashSet::new();
        self.dates
            .iter()
            .filter(|d| seen.insert(**d))
            .copied()
            .collect()
    }

    /// Distinct practitioners, sorted
    pub fn practitioners(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.practitioner_ids.clone();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Load a dataset from a file (CSV or Parquet based on extension)
pub fn load_dataset(path: &Path, infer_schema_length: usize) -> Result<LazyFrame> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let infer = if infer_schema_length == 0 {
        None
    } else {
        Some(infer_schema_length)
    };

    let lf = match extension.as_str() {
        "csv" => LazyCsvReader::new(path)
            .with_infer_schema_length(infer)
            .finish()
            .with_context(|| format!("Failed to load CSV file: {}", path.display()))?,
        "parquet" => LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to load Parquet file: {}", path.display()))?,
        _ => anyhow::bail!(
            "Unsupported file format: {}. Supported formats: csv, parquet",
            extension
        ),
    };

    Ok(lf)
}

/// Load and coerce the procedure table in one step.
pub fn load_procedures(
    path: &Path,
    schema: &ProcedureSchema,
    last_date: Option<NaiveDate>,
    infer_schema_length: usize,
) -> Result<ProcedureTable> {
    let df = load_dataset(path, infer_schema_length)?
        .collect()
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let table = ProcedureTable::from_frame(&df, schema, last_date)
        .with_context(|| format!("Invalid procedure data in {}", path.display()))?;
    Ok(table)
}

/// Parse `YYYY-MM-DD`, tolerating a trailing time component.
pub fn parse_procedure_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        raw.get(..10)
            .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
    })
}

fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, RateError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    let values = column
        .str()?
        .into_iter()
        .map(|v| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .collect();
    Ok(values)
}

fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, RateError> {
    let column = df.column(name)?;
    // Text columns go through a trim first so " 1.5" still parses
    let column = if column.dtype() == &DataType::String {
        let trimmed: Vec<Option<String>> = column
            .str()?
            .into_iter()
            .map(|v| v.map(|s| s.trim().to_string()))
            .collect();
        Column::new(name.into(), trimmed)
    } else {
        column.clone()
    };
    let float_col = column.cast(&DataType::Float64)?;
    let values = float_col
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    Ok(values)
}

fn select<T: Clone>(values: &[T], rows: &[usize]) -> Vec<T> {
    rows.iter().map(|&idx| values[idx].clone()).collect()
}
