//! Run summary report generation

use std::time::Duration;

use comfy_table::{presets::UTF8_FULL_CONDENSED, Attribute, Cell, Color, Table};
use console::style;

use crate::pipeline::RunSummary;

/// How many dropped models are listed before the rest are elided
const DROPPED_LIST_LIMIT: usize = 10;

/// Summary of a rate generation run
#[derive(Debug, Default)]
pub struct RateSummary {
    pub procedures: usize,
    pub practitioners: usize,
    pub imputations: usize,
    pub run: RunSummary,
    pub step_times: Vec<(String, Duration)>,
}

impl RateSummary {
    pub fn new(procedures: usize, practitioners: usize, imputations: usize) -> Self {
        Self {
            procedures,
            practitioners,
            imputations,
            ..Default::default()
        }
    }

    pub fn set_run(&mut self, run: RunSummary) {
        self.run = run;
    }

    pub fn add_step_time(&mut self, step: &str, elapsed: Duration) {
        self.step_times.push((step.to_string(), elapsed));
    }

    pub fn total_time(&self) -> Duration {
        self.step_times.iter().map(|(_, d)| *d).sum()
    }

    /// Rows of the summary table as (label, value) pairs
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Procedures", self.procedures.to_string()),
            ("Practitioners", self.practitioners.to_string()),
            ("Imputations", self.imputations.to_string()),
            ("Models Enumerated", self.run.total_models.to_string()),
            ("Models Computed", self.run.computed_models.to_string()),
            ("Models Without Cases", self.run.empty_models.to_string()),
            ("Models Dropped", self.run.dropped_count().to_string()),
            ("Unit Failures", self.run.failure_count().to_string()),
            ("Output Rows", self.run.output_rows.to_string()),
        ]
    }

    pub fn display(&self) {
        println!();
        println!(
            "    {} {}",
            style("📋").cyan(),
            style("RATE SUMMARY").white().bold()
        );
        println!("    {}", style("─".repeat(50)).dim());
        println!();

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec![
            Cell::new("Metric").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);

        for (label, value) in self.rows() {
            let cell = Cell::new(&value);
            let cell = match label {
                "Models Computed" | "Output Rows" => {
                    cell.fg(Color::Green).add_attribute(Attribute::Bold)
                }
                "Models Dropped" | "Unit Failures" if value != "0" => cell.fg(Color::Red),
                _ => cell,
            };
            table.add_row(vec![Cell::new(label), cell]);
        }

        if !self.step_times.is_empty() {
            table.add_row(vec![
                Cell::new("Total Time"),
                Cell::new(format!("{:.2}s", self.total_time().as_secs_f64())).fg(Color::Cyan),
            ]);
        }

        // Indent the table
        for line in table.to_string().lines() {
            println!("    {}", line);
        }

        if !self.run.dropped_models.is_empty() {
            println!();
            println!(
                "    {} {}",
                style("📝").cyan(),
                style("DROPPED MODELS").white().bold()
            );
            println!("    {}", style("─".repeat(50)).dim());
            for dropped in self.run.dropped_models.iter().take(DROPPED_LIST_LIMIT) {
                println!(
                    "        {} {} {}",
                    style("•").dim(),
                    dropped.model_id,
                    style(format!("({})", dropped.last_error)).dim()
                );
            }
            let rest = self.run.dropped_count().saturating_sub(DROPPED_LIST_LIMIT);
            if rest > 0 {
                println!("        {} and {} more", style("…").dim(), rest);
            }
        }

        if let Some(warning) = &self.run.imputation_warning {
            println!();
            println!("    {} {}", style("⚠").yellow().bold(), style(warning).yellow());
        }
    }
}
