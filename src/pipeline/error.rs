//! Error types for the rate pipeline.
//!
//! Every failure the pipeline can produce is a `RateError`. Each variant maps
//! onto an [`ErrorKind`], which decides whether the error aborts the run or is
//! contained to a single estimation unit.

use polars::prelude::PolarsError;
use thiserror::Error;

/// Broad classes of pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input does not have the columns or identifiers the pipeline needs.
    Schema,
    /// Invalid configuration or model grid.
    Validation,
    /// A single estimation unit has no usable rows or failed to fit.
    Data,
    /// Imputed values look implausible compared to the observed data.
    ImputationSanity,
}

/// Errors raised while loading, imputing, estimating or pooling.
#[derive(Debug, Error)]
pub enum RateError {
    /// One or more required columns are absent.
    #[error("Missing required columns in the dataset: [{}]", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// The practitioner identifier is null on some rows.
    #[error("Practitioner column '{column}' has {count} missing value(s)")]
    MissingPractitioner { column: String, count: usize },

    /// The event identifier is null on some rows.
    #[error("Event column '{column}' has {count} missing value(s)")]
    MissingEventId { column: String, count: usize },

    /// The event identifier is not unique.
    #[error("Event identifier '{event_id}' appears more than once")]
    DuplicateEvent { event_id: String },

    /// A covariate has no observed values, so nothing can be imputed from it.
    #[error("Covariate '{0}' has no observed values to impute from")]
    NothingObserved(String),

    /// The model type string is not one of the supported models.
    #[error("Invalid model type '{0}'. Supported: LOGISTIC, LINEAR")]
    UnsupportedModel(String),

    /// Two specifications in one grid share a model identifier.
    #[error("Model identifier '{0}' is not unique within the run")]
    DuplicateModel(String),

    /// Configuration values out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Every eligible row lacks the weighting field.
    #[error("No rows with a '{column}' value remain for analysis")]
    NoWeightedRows { column: String },

    /// The complete-case set is empty.
    #[error("No complete cases available for analysis")]
    NoCompleteCases,

    /// An imputed dataset does not line up with the source table.
    #[error("Imputed dataset {index} is not aligned with the source table: {reason}")]
    Misaligned { index: usize, reason: String },

    /// The model fit broke down numerically.
    #[error("Model fit failed: {0}")]
    FitFailed(String),

    /// Imputed values drift too far from the observed distribution.
    #[error(
        "Imputed values for {variable} may be unreasonable: imputation {index} mean {imputed_mean:.4} \
         vs observed mean {observed_mean:.4} (sd {observed_sd:.4})"
    )]
    ImputationSanity {
        variable: String,
        index: usize,
        imputed_mean: f64,
        observed_mean: f64,
        observed_sd: f64,
    },

    /// Imputed datasets disagree on shape.
    #[error("Imputed datasets have different shapes: {0:?}")]
    ShapeMismatch(Vec<(usize, usize)>),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

impl RateError {
    /// The class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RateError::MissingColumns(_)
            | RateError::MissingPractitioner { .. }
            | RateError::MissingEventId { .. }
            | RateError::DuplicateEvent { .. }
            | RateError::NothingObserved(_)
            | RateError::Polars(_) => ErrorKind::Schema,
            RateError::UnsupportedModel(_)
            | RateError::DuplicateModel(_)
            | RateError::Config(_) => ErrorKind::Validation,
            RateError::NoWeightedRows { .. }
            | RateError::NoCompleteCases
            | RateError::Misaligned { .. }
            | RateError::FitFailed(_) => ErrorKind::Data,
            RateError::ImputationSanity { .. } | RateError::ShapeMismatch(_) => {
                ErrorKind::ImputationSanity
            }
        }
    }

    /// Whether this error only affects one estimation unit.
    pub fn is_unit_local(&self) -> bool {
        self.kind() == ErrorKind::Data
    }
}
