//! CLI module - argument parsing and subcommands

mod args;
pub mod run;
pub mod simulate;

pub use args::{Cli, Commands, RunArgs, SimulateArgs};
pub use run::run_pipeline;
pub use simulate::{run_simulate, save_dataset};
