//! Surgrates: Risk-Adjusted Surgeon Rates
//!
//! A library for computing per-practitioner outcome rates from procedure
//! records with missing covariates, using multiple imputation, weighted
//! covariate-adjusted models and pooling across imputations.

pub mod cli;
pub mod pipeline;
pub mod report;
pub mod utils;
