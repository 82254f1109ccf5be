//! Command-line argument definitions using clap

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::pipeline::{
    AdjustmentRule, EstimatorConfig, ImputationConfig, OutcomeCatalog, OutcomeModel, PipelineConfig, ProcedureSchema,
    RateError, SimulationConfig,
};
use crate::report::TrimPolicy;

/// Surgrates - risk-adjusted surgeon rates from incomplete procedure data
#[derive(Parser, Debug)]
#[command(name = "surgrates")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Impute, fit and pool rates for every outcome, stratum and window
    Run(RunArgs),
    /// Generate a simulated melanoma procedure table
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Input file path (CSV or Parquet)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory for the rate tables.
    /// Defaults to the input file's directory.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Ignore procedures dated after this day (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub last_date: Option<NaiveDate>,

    /// Date stamped on every output row (YYYY-MM-DD).
    /// Defaults to --last-date, then to today.
    #[arg(long, value_parser = parse_date)]
    pub as_of: Option<NaiveDate>,

    /// Number of imputed datasets
    #[arg(long = "imputations", default_value = "5", value_parser = validate_positive)]
    pub imputations: usize,

    /// Round-robin sweeps per imputation
    #[arg(long, default_value = "10", value_parser = validate_positive)]
    pub max_iter: usize,

    /// Random seed for reproducible imputations
    #[arg(long)]
    pub seed: Option<u64>,

    /// Outcome model: LOGISTIC or LINEAR
    #[arg(long, default_value = "LOGISTIC")]
    pub model: String,

    /// Trailing window length in days. Without it every window is cumulative.
    #[arg(long, value_parser = validate_window_days)]
    pub window_days: Option<i64>,

    /// Worker threads for the model grid (default: all cores)
    #[arg(long, value_parser = validate_positive)]
    pub threads: Option<usize>,

    /// Minimum cases for a row to appear in the trimmed table
    #[arg(long, default_value = "1")]
    pub min_cases: usize,

    /// Scale the reference prediction by each surgeon's observed-to-expected
    /// ratio instead of reporting the raw rate or the reference prediction
    #[arg(long, default_value = "false")]
    pub observed_expected: bool,

    /// Add Rubin's rules variance columns to the full table
    #[arg(long, default_value = "false")]
    pub pooled_variance: bool,

    /// Check imputed means against the observed data and warn on drift
    #[arg(long, default_value = "false")]
    pub validate_imputations: bool,

    /// Adjustment covariates (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "age,female,bmi,thickness,ulceration")]
    pub covariates: Vec<String>,

    /// Reference covariate values (comma-separated, same order as --covariates).
    /// Defaults to the complete-case averages of each model.
    #[arg(long, value_delimiter = ',')]
    pub avg_covariates: Option<Vec<f64>>,

    /// Event identifier column
    #[arg(long, default_value = "eventId")]
    pub event_column: String,

    /// Practitioner identifier column
    #[arg(long, default_value = "userId")]
    pub practitioner_column: String,

    /// Procedure date column
    #[arg(long, default_value = "surgDate")]
    pub date_column: String,

    /// Seniority column used for weighting
    #[arg(short = 'w', long, default_value = "yos")]
    pub weight_column: String,

    /// Number of rows to use for schema inference (CSV only).
    /// Use 0 for full table scan.
    #[arg(long, default_value = "10000")]
    pub infer_schema_length: usize,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Output file path (CSV or Parquet, determined by extension)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Number of simulated procedures
    #[arg(long, default_value = "2000", value_parser = validate_positive)]
    pub patients: usize,

    /// Random seed
    #[arg(long, default_value = "20230728")]
    pub seed: u64,

    /// First possible procedure date (YYYY-MM-DD)
    #[arg(long, default_value = "2003-01-01", value_parser = parse_date)]
    pub start: NaiveDate,

    /// Last possible procedure date (YYYY-MM-DD)
    #[arg(long, default_value = "2018-12-31", value_parser = parse_date)]
    pub end: NaiveDate,
}

impl RunArgs {
    /// Output directory, derived from the input location if not given.
    pub fn output_dir(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            self.input
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf()
        })
    }

    pub fn schema(&self) -> ProcedureSchema {
        ProcedureSchema {
            event_id: self.event_column.clone(),
            practitioner_id: self.practitioner_column.clone(),
            date: self.date_column.clone(),
            weight: self.weight_column.clone(),
            covariates: self.covariates.clone(),
            ..Default::default()
        }
    }

    /// Build the pipeline configuration.
    ///
    /// Fails on an unsupported model type.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, RateError> {
        let model: OutcomeModel = self.model.parse()?;
        let schema = self.schema();
        Ok(PipelineConfig {
            imputation: ImputationConfig {
                n_imputations: self.imputations,
                max_iter: self.max_iter,
                seed: self.seed,
                ..Default::default()
            },
            estimator: EstimatorConfig {
                covariates: self.covariates.clone(),
                weight_column: self.weight_column.clone(),
                stratify_by: schema.stratify_by,
                lookback_days: self.window_days,
                model,
                avg_covariates: self.avg_covariates.clone(),
                adjustment: if self.observed_expected {
                    AdjustmentRule::ObservedExpected
                } else {
                    AdjustmentRule::Reference
                },
                ..Default::default()
            },
            catalog: OutcomeCatalog::melanoma(),
            as_of: self.as_of.or(self.last_date),
            pooled_variance: self.pooled_variance,
            validate_imputations: self.validate_imputations,
            threads: self.threads,
        })
    }

    pub fn trim_policy(&self) -> TrimPolicy {
        TrimPolicy {
            min_cases: self.min_cases,
        }
    }
}

impl SimulateArgs {
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            n_patients: self.patients,
            start: self.start,
            end: self.end,
            seed: self.seed,
            ..Default::default()
        }
    }
}

/// Parser for YYYY-MM-DD dates
fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| format!("'{}' is not a valid date (expected YYYY-MM-DD)", s))
}

/// Validator for counts that must be at least 1
fn validate_positive(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;

    if value == 0 {
        Err("value must be at least 1".to_string())
    } else {
        Ok(value)
    }
}

/// Longest accepted lookback, one hundred years
const MAX_WINDOW_DAYS: i64 = 36_525;

/// Validator for window_days parameter
fn validate_window_days(s: &str) -> Result<i64, String> {
    let value: i64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;

    if value < 1 {
        Err(format!("window_days must be at least 1, got {}", value))
    } else if value > MAX_WINDOW_DAYS {
        Err(format!(
            "window_days must be at most {}, got {}",
            MAX_WINDOW_DAYS, value
        ))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2018-01-31"), Ok(NaiveDate::from_ymd_opt(2018, 1, 31).unwrap()));
        assert!(parse_date("31/01/2018").is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert_eq!(validate_positive("3"), Ok(3));
        assert!(validate_positive("0").is_err());
        assert!(validate_positive("abc").is_err());
    }

    #[test]
    fn test_validate_window_days() {
        assert_eq!(validate_window_days("365"), Ok(365));
        assert!(validate_window_days("0").is_err());
        assert!(validate_window_days("-5").is_err());
        assert_eq!(validate_window_days("36525"), Ok(36_525));
        assert!(validate_window_days("36526").is_err());
        assert!(validate_window_days("100000000000000").is_err());
    }
}
