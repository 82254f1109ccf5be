//! Surgrates: Surgeon Rates CLI Tool
//!
//! Computes risk-adjusted surgeon rates from incomplete procedure data, or
//! generates a simulated procedure table to try it on.

use std::process::ExitCode;

use clap::Parser;
use console::style;

use surgrates::cli::{run_pipeline, run_simulate, Cli, Commands};

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Simulate(args) => run_simulate(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("    {} {}", style("✗").red().bold(), style(&e).red().bold());
            for cause in e.chain().skip(1) {
                eprintln!("      {} {}", style("caused by:").dim(), cause);
            }
            ExitCode::FAILURE
        }
    }
}
