//! The `run` command: load, impute, estimate, pool and save

use std::time::Instant;

use anyhow::{Context, Result};
use console::style;

use super::RunArgs;
use crate::pipeline::{
    analyze_missing_covariates, check_schema, covariates_above_threshold,
    covariates_needing_imputation, enumerate_models, load_procedures, run_models,
    validate_imputations, MultipleImputer,
};
use crate::report::{
    export_run_summary, save_results, RateSummary, RunMetadata, RUN_SUMMARY_FILE,
};
use crate::utils::{
    create_progress_bar, create_spinner, finish_with_success, finish_with_warning, print_banner,
    print_completion, print_config, print_count, print_info, print_step_header, print_step_time,
    print_success, print_warning, ConfigCard,
};

/// Covariates missing more often than this get a warning before imputation
const HIGH_MISSING_RATIO: f64 = 0.3;

/// Run the full rate pipeline for the given arguments
pub fn run_pipeline(args: &RunArgs) -> Result<()> {
    let config = args.pipeline_config()?;
    let schema = args.schema();
    let output_dir = args.output_dir();
    let as_of = config.resolved_as_of().to_string();
    let window = match config.estimator.lookback_days {
        Some(days) => format!("trailing {} days", days),
        None => "cumulative".to_string(),
    };

    print_banner(env!("CARGO_PKG_VERSION"));
    print_config(&ConfigCard {
        input: &args.input,
        output: &output_dir,
        model: config.estimator.model.method_tag(),
        imputations: config.imputation.n_imputations,
        as_of: &as_of,
        window: &window,
    });

    // Step 1: Load procedures
    print_step_header(1, "Load Procedures");
    let step_start = Instant::now();
    let spinner = create_spinner("Reading procedure table...");
    let table = load_procedures(&args.input, &schema, args.last_date, args.infer_schema_length)?;
    finish_with_success(&spinner, "Procedure table loaded");

    let practitioners = table.practitioners().len();
    println!("\n    {} Dataset Statistics:", style("✧").cyan());
    println!("      Procedures: {}", table.len());
    println!("      Practitioners: {}", practitioners);
    println!("      Procedure dates: {}", table.distinct_dates().len());
    if table.is_empty() {
        anyhow::bail!("No dated procedures left to analyse in {}", args.input.display());
    }

    let mut summary = RateSummary::new(table.len(), practitioners, config.imputation.n_imputations);
    let elapsed = step_start.elapsed();
    summary.add_step_time("load", elapsed);
    print_step_time(elapsed);

    // Step 2: Missing covariates
    print_step_header(2, "Missing Covariate Analysis");
    let step_start = Instant::now();
    let profiles = analyze_missing_covariates(&table, false)?;
    let to_impute = covariates_needing_imputation(&profiles);
    if to_impute.is_empty() {
        print_info("All covariates fully observed; imputations will be identical");
    } else {
        print_count("covariate(s) with missing values", to_impute.len(), None);
        for profile in profiles.iter().filter(|p| p.missing > 0) {
            println!(
                "        {} {:<12} {:>6} ({:.1}%)",
                style("•").dim(),
                profile.name,
                profile.missing,
                profile.ratio * 100.0
            );
        }
    }
    for name in covariates_above_threshold(&profiles, HIGH_MISSING_RATIO) {
        print_warning(&format!(
            "'{}' is missing in more than {:.0}% of procedures",
            name,
            HIGH_MISSING_RATIO * 100.0
        ));
    }
    let elapsed = step_start.elapsed();
    summary.add_step_time("missing", elapsed);
    print_step_time(elapsed);

    // Step 3: Model grid and imputation
    print_step_header(3, "Multiple Imputation");
    let step_start = Instant::now();
    let specs = enumerate_models(&config.catalog, &table)?;
    check_schema(&table, &specs, &config.estimator)?;
    print_count("model specification(s)", specs.len(), None);

    let spinner = create_spinner("Imputing missing covariates...");
    let imputations = MultipleImputer::new(config.imputation.clone())
        .impute(&table, &config.estimator.covariates)?;
    finish_with_success(
        &spinner,
        &format!("{} imputed dataset(s) ready", imputations.len()),
    );

    let mut imputation_warning = None;
    if config.validate_imputations {
        match validate_imputations(&table, &imputations, &config.estimator.covariates) {
            Ok(()) => print_success("Imputed values are consistent with the observed data"),
            Err(e) => {
                log::warn!("{}", e);
                print_warning(&e.to_string());
                imputation_warning = Some(e.to_string());
            }
        }
    }
    let elapsed = step_start.elapsed();
    summary.add_step_time("impute", elapsed);
    print_step_time(elapsed);

    // Step 4: Estimate and pool
    print_step_header(4, "Estimate and Pool Rates");
    let step_start = Instant::now();
    let pb = create_progress_bar(specs.len() as u64, "    Fitting");
    let mut run = run_models(&table, &imputations, &specs, &config, Some(&pb))?;
    run.summary.imputation_warning = imputation_warning;
    if run.summary.dropped_models.is_empty() {
        finish_with_success(&pb, &format!("{} model(s) computed", run.summary.computed_models));
    } else {
        finish_with_warning(
            &pb,
            &format!(
                "{} model(s) computed, {} dropped",
                run.summary.computed_models,
                run.summary.dropped_count()
            ),
        );
    }
    let elapsed = step_start.elapsed();
    summary.add_step_time("estimate", elapsed);
    print_step_time(elapsed);

    // Step 5: Save
    print_step_header(5, "Save Results");
    let step_start = Instant::now();
    let spinner = create_spinner("Writing rate tables...");
    let paths = save_results(
        &run.rates,
        &output_dir,
        &args.trim_policy(),
        config.pooled_variance,
    )?;
    let summary_path = output_dir.join(RUN_SUMMARY_FILE);
    export_run_summary(
        &run.summary,
        RunMetadata::new(
            &args.input.display().to_string(),
            &config,
            args.min_cases,
        ),
        &summary_path,
    )
    .context("Failed to export the run summary")?;
    finish_with_success(&spinner, &format!("Saved to {}", output_dir.display()));
    println!("      {}", style(paths.full.display()).dim());
    println!("      {}", style(paths.trimmed.display()).dim());
    println!("      {}", style(summary_path.display()).dim());
    let elapsed = step_start.elapsed();
    summary.add_step_time("save", elapsed);
    print_step_time(elapsed);

    summary.set_run(run.summary);
    summary.display();
    print_completion();

    Ok(())
}
