//! Run orchestration
//!
//! Imputes once, enumerates the model grid, and fans the specifications out
//! across a rayon pool. Each specification is estimated against every
//! completed dataset, the successful tables are pooled, and the pooled rows
//! are folded into a [`RateAccumulator`]. Unit failures are logged and counted
//! rather than aborting the run.

use chrono::{Local, NaiveDate};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;

use super::enumerator::{enumerate_models, ModelSpecification, OutcomeCatalog};
use super::error::{ErrorKind, RateError};
use super::estimator::{estimate_rates, EstimatorConfig};
use super::imputation::{validate_imputations, ImputationConfig, ImputedDataset, MultipleImputer};
use super::loader::ProcedureTable;
use super::pooling::pool_estimates;

/// Everything a run needs besides the data.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub imputation: ImputationConfig,
    pub estimator: EstimatorConfig,
    pub catalog: OutcomeCatalog,
    /// Date stamped on every output row; today when unset
    pub as_of: Option<NaiveDate>,
    /// Report Rubin's rules variance columns
    pub pooled_variance: bool,
    /// Run the imputation sanity check and log what it finds
    pub validate_imputations: bool,
    /// Worker threads for the model fan-out; all cores when unset
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            imputation: ImputationConfig::default(),
            estimator: EstimatorConfig::default(),
            catalog: OutcomeCatalog::melanoma(),
            as_of: None,
            pooled_variance: false,
            validate_imputations: false,
            threads: None,
        }
    }
}

impl PipelineConfig {
    pub fn resolved_as_of(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Local::now().date_naive())
    }
}

/// One row of the full output table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurgeonRate {
    pub surgeon_id: String,
    pub rate: f64,
    pub raw_rate: f64,
    pub cases: usize,
    pub method: String,
    pub model_id: String,
    pub date: NaiveDate,
    /// Imputations that contributed to the pooled value
    pub imputations: usize,
    pub between_variance: Option<f64>,
    pub total_variance: Option<f64>,
}

/// A failed (specification, imputation) unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub model_id: String,
    pub outcome: String,
    pub stratum: String,
    pub window: String,
    pub imputation: usize,
    pub kind: ErrorKind,
    pub message: String,
}

/// A specification for which every imputation failed.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedModel {
    pub model_id: String,
    pub last_error: String,
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_models: usize,
    pub computed_models: usize,
    /// Specifications with no eligible procedures at all
    pub empty_models: usize,
    pub dropped_models: Vec<DroppedModel>,
    pub unit_failures: Vec<UnitFailure>,
    pub output_rows: usize,
    pub imputation_warning: Option<String>,
}

impl RunSummary {
    pub fn dropped_count(&self) -> usize {
        self.dropped_models.len()
    }

    pub fn failure_count(&self) -> usize {
        self.unit_failures.len()
    }
}

/// Output rows plus the summary describing how they were produced
#[derive(Debug, Clone)]
pub struct RateRun {
    pub rates: Vec<SurgeonRate>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone)]
enum ModelStatus {
    Computed,
    Empty,
    Dropped(String),
}

/// Result of one specification across all imputations.
#[derive(Debug, Clone)]
pub struct ModelResult {
    pub model_id: String,
    rates: Vec<SurgeonRate>,
    failures: Vec<UnitFailure>,
    status: ModelStatus,
}

impl ModelResult {
    pub fn rates(&self) -> &[SurgeonRate] {
        &self.rates
    }

    pub fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self.status, ModelStatus::Dropped(_))
    }
}

/// Order-independent collector for per-specification results.
#[derive(Debug, Default)]
pub struct RateAccumulator {
    rates: Vec<SurgeonRate>,
    summary: RunSummary,
}

impl RateAccumulator {
    pub fn absorb(mut self, result: ModelResult) -> Self {
        self.summary.total_models += 1;
        match result.status {
            ModelStatus::Computed => self.summary.computed_models += 1,
            ModelStatus::Empty => self.summary.empty_models += 1,
            ModelStatus::Dropped(last_error) => self.summary.dropped_models.push(DroppedModel {
                model_id: result.model_id,
                last_error,
            }),
        }
        self.summary.unit_failures.extend(result.failures);
        self.rates.extend(result.rates);
        self
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.rates.extend(other.rates);
        self.summary.total_models += other.summary.total_models;
        self.summary.computed_models += other.summary.computed_models;
        self.summary.empty_models += other.summary.empty_models;
        self.summary.dropped_models.extend(other.summary.dropped_models);
        self.summary.unit_failures.extend(other.summary.unit_failures);
        self
    }

    /// Sort rows by model identifier then practitioner.
    pub fn finish(mut self) -> RateRun {
        self.rates.sort_by(|a, b| {
            a.model_id
                .cmp(&b.model_id)
                .then_with(|| a.surgeon_id.cmp(&b.surgeon_id))
        });
        self.summary.dropped_models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        self.summary.unit_failures.sort_by(|a, b| {
            a.model_id
                .cmp(&b.model_id)
                .then_with(|| a.imputation.cmp(&b.imputation))
        });
        self.summary.output_rows = self.rates.len();
        RateRun {
            rates: self.rates,
            summary: self.summary,
        }
    }
}

/// Check the table carries every column the grid will touch.
pub fn check_schema(
    table: &ProcedureTable,
    specs: &[ModelSpecification],
    config: &EstimatorConfig,
) -> Result<(), RateError> {
    let mut missing: Vec<String> = Vec::new();
    let mut require = |name: &str, present: bool| {
        if !present && !missing.iter().any(|m| m == name) {
            missing.push(name.to_string());
        }
    };

    for covariate in &config.covariates {
        require(covariate, table.covariate(covariate).is_some());
    }
    require(&config.stratify_by, table.column(&config.stratify_by).is_some());
    for spec in specs {
        require(&spec.outcome.column, table.outcome(&spec.outcome.column).is_some());
        if let Some(flag) = &spec.outcome.prerequisite {
            require(flag, table.column(flag).is_some());
        }
    }

    if !missing.is_empty() {
        return Err(RateError::MissingColumns(missing));
    }

    if let Some(avg) = &config.avg_covariates {
        if avg.len() != config.covariates.len() {
            return Err(RateError::Config(format!(
                "{} average covariate value(s) supplied for {} covariate(s)",
                avg.len(),
                config.covariates.len()
            )));
        }
    }
    Ok(())
}

/// Estimate one specification against every imputed dataset and pool.
pub fn process_model(
    table: &ProcedureTable,
    imputations: &[ImputedDataset],
    spec: &ModelSpecification,
    config: &PipelineConfig,
    as_of: NaiveDate,
) -> ModelResult {
    let estimator = &config.estimator;
    if spec
        .eligible_rows(table, &estimator.stratify_by, estimator.lookback_days)
        .is_empty()
    {
        return ModelResult {
            model_id: spec.model_id.clone(),
            rates: Vec::new(),
            failures: Vec::new(),
            status: ModelStatus::Empty,
        };
    }

    let mut tables = Vec::with_capacity(imputations.len());
    let mut failures = Vec::new();
    for dataset in imputations {
        match estimate_rates(table, dataset, spec, estimator) {
            Ok(estimates) => tables.push(estimates),
            Err(e) => {
                log::warn!(
                    "Skipping {} (outcome {}, stratum {}, window {}) on imputation {}: {}",
                    spec.model_id,
                    spec.outcome.column,
                    spec.stratum.tag(),
                    spec.window_tag(),
                    dataset.index,
                    e
                );
                failures.push(UnitFailure {
                    model_id: spec.model_id.clone(),
                    outcome: spec.outcome.column.clone(),
                    stratum: spec.stratum.tag().to_string(),
                    window: spec.window_tag(),
                    imputation: dataset.index,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }

    if tables.is_empty() {
        let last_error = failures
            .last()
            .map(|f| f.message.clone())
            .unwrap_or_else(|| "no imputed datasets".to_string());
        log::warn!("Dropping {}: every imputation failed", spec.model_id);
        return ModelResult {
            model_id: spec.model_id.clone(),
            rates: Vec::new(),
            failures,
            status: ModelStatus::Dropped(last_error),
        };
    }

    let rates = pool_estimates(&tables, config.pooled_variance)
        .into_iter()
        .map(|pooled| SurgeonRate {
            surgeon_id: pooled.practitioner_id,
            rate: pooled.rate,
            raw_rate: pooled.raw_rate,
            cases: pooled.cases,
            method: pooled.method,
            model_id: spec.model_id.clone(),
            date: as_of,
            imputations: pooled.imputations,
            between_variance: pooled.variance.map(|v| v.between),
            total_variance: pooled.variance.map(|v| v.total),
        })
        .collect();

    ModelResult {
        model_id: spec.model_id.clone(),
        rates,
        failures,
        status: ModelStatus::Computed,
    }
}

/// Estimate every specification against the given imputations.
///
/// Schema problems abort before any work is scheduled; everything after that
/// is contained per unit.
pub fn run_models(
    table: &ProcedureTable,
    imputations: &[ImputedDataset],
    specs: &[ModelSpecification],
    config: &PipelineConfig,
    progress: Option<&ProgressBar>,
) -> Result<RateRun, RateError> {
    check_schema(table, specs, &config.estimator)?;
    if imputations.is_empty() {
        return Err(RateError::Config("no imputed datasets provided".to_string()));
    }

    let as_of = config.resolved_as_of();
    let fan_out = || {
        specs
            .par_iter()
            .map(|spec| {
                let result = process_model(table, imputations, spec, config, as_of);
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                result
            })
            .fold(RateAccumulator::default, RateAccumulator::absorb)
            .reduce(RateAccumulator::default, RateAccumulator::merge)
    };

    let accumulator = match config.threads {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| RateError::Config(format!("cannot build a {n}-thread pool: {e}")))?
            .install(fan_out),
        None => fan_out(),
    };

    Ok(accumulator.finish())
}

/// Impute, enumerate and estimate in one go.
pub fn generate_rates(
    table: &ProcedureTable,
    config: &PipelineConfig,
    progress: Option<&ProgressBar>,
) -> Result<RateRun, RateError> {
    let specs = enumerate_models(&config.catalog, table)?;
    check_schema(table, &specs, &config.estimator)?;

    if let Some(pb) = progress {
        pb.set_length(specs.len() as u64);
    }

    let imputations =
        MultipleImputer::new(config.imputation.clone()).impute(table, &config.estimator.covariates)?;

    let mut imputation_warning = None;
    if config.validate_imputations {
        if let Err(e) = validate_imputations(table, &imputations, &config.estimator.covariates) {
            log::warn!("{}", e);
            imputation_warning = Some(e.to_string());
        }
    }

    let mut run = run_models(table, &imputations, &specs, config, progress)?;
    run.summary.imputation_warning = imputation_warning;
    Ok(run)
}
