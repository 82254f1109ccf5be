//! Pipeline module - imputation, model grid, estimation and pooling

pub mod enumerator;
pub mod error;
pub mod estimator;
pub mod imputation;
mod linalg;
pub mod loader;
pub mod logistic;
pub mod missing;
pub mod orchestrator;
pub mod pooling;
pub mod simulate;
pub mod weights;

pub use enumerator::*;
pub use error::{ErrorKind, RateError};
pub use estimator::{estimate_rates, AdjustmentRule, EstimatorConfig, OutcomeModel, RateEstimate};
pub use imputation::{validate_imputations, ImputationConfig, ImputedDataset, MultipleImputer};
pub use loader::*;
pub use missing::*;
pub use orchestrator::*;
pub use pooling::{pool_estimates, PooledRateEstimate, PooledVariance};
pub use simulate::{simulate_procedures, SimulationConfig};
pub use weights::*;
