//! Run summary export

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::pipeline::{PipelineConfig, RunSummary};

/// File name of the JSON run summary
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Metadata about the run
#[derive(Serialize)]
pub struct RunMetadata {
    /// Timestamp of the run (ISO 8601 format)
    pub timestamp: String,
    /// Surgrates version
    pub surgrates_version: String,
    /// Input file path
    pub input_file: String,
    /// Number of completed datasets
    pub imputations: usize,
    /// Imputation sweeps per completion
    pub max_iter: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Outcome model used for adjustment
    pub model: String,
    /// Date stamped on the output rows
    pub as_of: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookback_days: Option<i64>,
    pub covariates: Vec<String>,
    pub pooled_variance: bool,
    pub min_cases: usize,
}

/// Complete run export
#[derive(Serialize)]
pub struct RunExport<'a> {
    pub metadata: RunMetadata,
    pub summary: &'a RunSummary,
}

impl RunMetadata {
    pub fn new(input_file: &str, config: &PipelineConfig, min_cases: usize) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            surgrates_version: env!("CARGO_PKG_VERSION").to_string(),
            input_file: input_file.to_string(),
            imputations: config.imputation.n_imputations,
            max_iter: config.imputation.max_iter,
            seed: config.imputation.seed,
            model: config.estimator.model.to_string(),
            as_of: config.resolved_as_of(),
            lookback_days: config.estimator.lookback_days,
            covariates: config.estimator.covariates.clone(),
            pooled_variance: config.pooled_variance,
            min_cases,
        }
    }
}

/// Export the run summary to a JSON file
///
/// # Arguments
/// * `summary` - Counts and failures from the orchestrator
/// * `metadata` - Run configuration
/// * `output_path` - Path to write the JSON file
pub fn export_run_summary(summary: &RunSummary, metadata: RunMetadata, output_path: &Path) -> Result<()> {
    let export = RunExport { metadata, summary };

    let json = serde_json::to_string_pretty(&export)
        .context("Failed to serialize run summary to JSON")?;

    std::fs::write(output_path, json)
        .with_context(|| format!("Failed to write run summary to {}", output_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_metadata_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RUN_SUMMARY_FILE);
        let config = PipelineConfig {
            as_of: NaiveDate::from_ymd_opt(2021, 3, 4),
            ..Default::default()
        };
        let summary = RunSummary {
            total_models: 4,
            computed_models: 3,
            empty_models: 1,
            ..Default::default()
        };

        export_run_summary(&summary, RunMetadata::new("data.csv", &config, 1), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["metadata"]["input_file"], "data.csv");
        assert_eq!(value["metadata"]["as_of"], "2021-03-04");
        assert_eq!(value["metadata"]["model"], "LOGISTIC");
        assert_eq!(value["summary"]["computed_models"], 3);
        assert!(value["metadata"].get("seed").is_none());
    }
}
