//! Report module - rate tables, run summaries and exports

pub mod output;
pub mod run_export;
pub mod summary;

pub use output::*;
pub use run_export::*;
pub use summary::*;
