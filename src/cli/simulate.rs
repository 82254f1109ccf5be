//! Simulated data generation command

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use polars::prelude::*;

use super::SimulateArgs;
use crate::pipeline::simulate_procedures;
use crate::utils::create_spinner;

/// Generate a simulated procedure table and write it to disk
pub fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let config = args.simulation_config();

    println!(
        "\n {} Simulating melanoma procedures",
        style("◆").cyan().bold()
    );
    println!("   Patients: {}", style(config.n_patients).dim());
    println!("   Dates:    {} to {}", style(config.start).dim(), style(config.end).dim());
    println!("   Output:   {}", style(args.output.display()).dim());
    println!();

    let spinner = create_spinner("Generating procedures...");
    let mut df = simulate_procedures(&config)?;
    spinner.finish_with_message(format!(
        "{} Generated {} rows x {} columns",
        style("✓").green(),
        df.height(),
        df.width()
    ));

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    save_dataset(&mut df, &args.output)?;
    println!(
        "   {} Saved to {}",
        style("✓").green(),
        style(args.output.display()).bold()
    );

    Ok(())
}

/// Save dataset to file (CSV or Parquet based on extension)
pub fn save_dataset(df: &mut DataFrame, path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "csv" => {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            CsvWriter::new(&mut file)
                .finish(df)
                .with_context(|| format!("Failed to write CSV file: {}", path.display()))?;
        }
        "parquet" => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            ParquetWriter::new(file)
                .finish(df)
                .with_context(|| format!("Failed to write Parquet file: {}", path.display()))?;
        }
        _ => anyhow::bail!(
            "Unsupported output format: {}. Supported formats: csv, parquet",
            extension
        ),
    }

    Ok(())
}
