//! Tests for CLI argument parsing and the binary end to end

use std::path::PathBuf;

use assert_cmd::Command;
use chrono::NaiveDate;
use clap::Parser;
use predicates::prelude::*;
use surgrates::cli::{Cli, Commands, RunArgs};
use surgrates::pipeline::{AdjustmentRule, ErrorKind, OutcomeModel};
use surgrates::report::{FULL_RATES_FILE, RUN_SUMMARY_FILE, TRIMMED_RATES_FILE};
use tempfile::TempDir;

fn run_args(extra: &[&str]) -> RunArgs {
    let mut argv = vec!["surgrates", "run", "-i", "data.csv"];
    argv.extend_from_slice(extra);
    match Cli::parse_from(argv).command {
        Commands::Run(args) => args,
        other => panic!("expected run command, got {other:?}"),
    }
}

#[test]
fn test_run_default_values() {
    let args = run_args(&[]);

    assert_eq!(args.imputations, 5, "Default imputations should be 5");
    assert_eq!(args.max_iter, 10);
    assert_eq!(args.model, "LOGISTIC");
    assert_eq!(args.window_days, None, "Windows are cumulative by default");
    assert_eq!(args.min_cases, 1);
    assert_eq!(args.weight_column, "yos");
    assert_eq!(
        args.covariates,
        vec!["age", "female", "bmi", "thickness", "ulceration"]
    );
    assert!(!args.pooled_variance);
    assert!(!args.observed_expected);
    assert!(!args.validate_imputations);
    assert_eq!(args.infer_schema_length, 10000);
}

#[test]
fn test_output_dir_defaults_to_input_directory() {
    let args = Cli::parse_from(["surgrates", "run", "-i", "/path/to/procedures.csv"]);
    let Commands::Run(args) = args.command else {
        panic!("expected run command");
    };
    assert_eq!(args.output_dir(), PathBuf::from("/path/to"));

    assert_eq!(run_args(&[]).output_dir(), PathBuf::from("."));
    assert_eq!(run_args(&["-o", "out"]).output_dir(), PathBuf::from("out"));
}

#[test]
fn test_custom_run_options_reach_pipeline_config() {
    let args = run_args(&[
        "--imputations",
        "3",
        "--seed",
        "7",
        "--model",
        "linear",
        "--window-days",
        "365",
        "--last-date",
        "2018-06-30",
        "--covariates",
        "age,bmi",
        "--avg-covariates",
        "60,27",
        "--threads",
        "2",
        "--pooled-variance",
        "--observed-expected",
    ]);
    let config = args.pipeline_config().unwrap();

    assert_eq!(config.imputation.n_imputations, 3);
    assert_eq!(config.imputation.seed, Some(7));
    assert_eq!(config.estimator.model, OutcomeModel::Linear);
    assert_eq!(config.estimator.lookback_days, Some(365));
    assert_eq!(config.estimator.covariates, vec!["age", "bmi"]);
    assert_eq!(config.estimator.avg_covariates, Some(vec![60.0, 27.0]));
    assert_eq!(config.threads, Some(2));
    assert!(config.pooled_variance);
    assert_eq!(config.estimator.adjustment, AdjustmentRule::ObservedExpected);
    // Without --as-of the rows are stamped with the cutoff date
    assert_eq!(config.as_of, NaiveDate::from_ymd_opt(2018, 6, 30));
}

#[test]
fn test_as_of_overrides_last_date() {
    let args = run_args(&["--last-date", "2018-06-30", "--as-of", "2018-07-15"]);
    let config = args.pipeline_config().unwrap();
    assert_eq!(config.as_of, NaiveDate::from_ymd_opt(2018, 7, 15));
    assert_eq!(config.estimator.adjustment, AdjustmentRule::Reference);
}

#[test]
fn test_unsupported_model_is_rejected() {
    let err = run_args(&["--model", "SURVIVAL"]).pipeline_config().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("SURVIVAL"));
}

#[test]
fn test_invalid_arguments_fail_to_parse() {
    let bad = [
        vec!["surgrates", "run", "-i", "d.csv", "--last-date", "30/06/2018"],
        vec!["surgrates", "run", "-i", "d.csv", "--imputations", "0"],
        vec!["surgrates", "run", "-i", "d.csv", "--window-days", "0"],
        vec!["surgrates", "run", "-i", "d.csv", "--window-days", "100000000"],
        vec!["surgrates", "run"],
        vec!["surgrates", "simulate"],
    ];
    for argv in bad {
        assert!(Cli::try_parse_from(argv.iter().copied()).is_err(), "should reject {argv:?}");
    }
}

#[test]
fn test_simulate_defaults() {
    let cli = Cli::parse_from(["surgrates", "simulate", "-o", "sim.csv"]);
    let Commands::Simulate(args) = cli.command else {
        panic!("expected simulate command");
    };
    let config = args.simulation_config();
    assert_eq!(config.n_patients, 2000);
    assert_eq!(config.seed, 20230728);
    assert_eq!(config.start, NaiveDate::from_ymd_opt(2003, 1, 1).unwrap());
    assert_eq!(config.end, NaiveDate::from_ymd_opt(2018, 12, 31).unwrap());
}

#[test]
fn test_verbose_flag_is_global() {
    let cli = Cli::parse_from(["surgrates", "run", "-i", "d.csv", "-vv"]);
    assert_eq!(cli.verbose, 2);
}

#[test]
fn test_binary_simulate_then_run() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("procedures.csv");
    let out = dir.path().join("rates");

    Command::cargo_bin("surgrates")
        .unwrap()
        .args(["simulate", "--patients", "60", "--seed", "3"])
        .args(["--start", "2018-01-01", "--end", "2018-01-08"])
        .arg("-o")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved to"));
    assert!(input.exists());

    Command::cargo_bin("surgrates")
        .unwrap()
        .args(["run", "--imputations", "2", "--seed", "1", "--as-of", "2018-01-08"])
        .arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    assert!(out.join(FULL_RATES_FILE).exists());
    assert!(out.join(TRIMMED_RATES_FILE).exists());

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join(RUN_SUMMARY_FILE)).unwrap())
            .unwrap();
    assert!(summary["summary"]["total_models"].as_u64().unwrap() > 0);
}

#[test]
fn test_binary_fails_on_missing_input() {
    let dir = TempDir::new().unwrap();

    Command::cargo_bin("surgrates")
        .unwrap()
        .args(["run", "-i"])
        .arg(dir.path().join("absent.csv"))
        .assert()
        .failure();
}
