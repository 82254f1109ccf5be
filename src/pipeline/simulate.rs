//! Synthetic melanoma procedure data
//!
//! Produces a table with the default [`ProcedureSchema`](super::ProcedureSchema)
//! layout: covariates with realistic gaps, nodal staging flags that depend on
//! one another, and complication indicators whose risk rises with age, BMI and
//! tumour thickness.

use anyhow::{bail, Result};
use chrono::{Datelike, Duration, NaiveDate};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Knobs for the generator
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub n_patients: usize,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub seed: u64,
    pub surgeons: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_patients: 2000,
            start: NaiveDate::from_ymd_opt(2003, 1, 1).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2018, 12, 31).unwrap_or_default(),
            seed: 20230728,
            surgeons: ["ARIYAN", "BRADY", "COIT", "SMITH", "JONES", "PATEL", "WONG"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

const SITES: [(&str, f64); 13] = [
    ("TRUNK", 0.25),
    ("ARM", 0.15),
    ("LEG", 0.15),
    ("SCALP", 0.08),
    ("NECK", 0.08),
    ("HAND", 0.05),
    ("FOOT", 0.05),
    ("FACE", 0.08),
    ("EAR", 0.04),
    ("OCULAR", 0.02),
    ("EYELID", 0.02),
    ("LIP", 0.02),
    ("MUCOSAL", 0.01),
];

/// Complication stems with the chance each accompanies a complication
const COMPLICATIONS: [(&str, f64); 4] = [
    ("woundInf", 0.4),
    ("cellulitis", 0.3),
    ("seroma", 0.2),
    ("graftComp", 0.1),
];

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn flag(rng: &mut StdRng, p: f64) -> f64 {
    if rng.gen::<f64>() < p {
        1.0
    } else {
        0.0
    }
}

/// Blank out `fraction` of the entries, chosen without replacement.
fn knock_out(rng: &mut StdRng, values: &mut [Option<f64>], fraction: f64) {
    let n = values.len();
    let count = (n as f64 * fraction) as usize;
    for idx in sample(rng, n, count.min(n)) {
        values[idx] = None;
    }
}

fn pick_site(rng: &mut StdRng) -> &'static str {
    let mut u: f64 = rng.gen();
    for (site, p) in SITES {
        if u < p {
            return site;
        }
        u -= p;
    }
    SITES[0].0
}

/// Generate a simulated procedure table.
pub fn simulate_procedures(config: &SimulationConfig) -> Result<DataFrame> {
    if config.n_patients == 0 {
        bail!("Number of patients must be positive");
    }
    if config.surgeons.is_empty() {
        bail!("At least one surgeon is required");
    }
    let days_range = (config.end - config.start).num_days();
    if days_range <= 0 {
        bail!(
            "End date {} must be after start date {}",
            config.end,
            config.start
        );
    }

    let n = config.n_patients;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let age_dist = Normal::<f64>::new(60.0, 15.0)?;
    let bmi_dist = Normal::<f64>::new(27.0, 5.0)?;
    let unit_normal = Normal::<f64>::new(0.0, 1.0)?;

    let dates: Vec<NaiveDate> = (0..n)
        .map(|_| config.start + Duration::days(rng.gen_range(0..days_range)))
        .collect();
    let event_ids: Vec<String> = (0..n).map(|i| format!("E{:07}", i + 1)).collect();
    let user_ids: Vec<String> = (0..n)
        .map(|_| config.surgeons[rng.gen_range(0..config.surgeons.len())].clone())
        .collect();
    let yos: Vec<i32> = dates.iter().map(|d| d.year()).collect();

    let ages: Vec<f64> = (0..n)
        .map(|_| age_dist.sample(&mut rng).clamp(18.0, 100.0).trunc())
        .collect();
    let female: Vec<f64> = (0..n).map(|_| flag(&mut rng, 0.45)).collect();

    let mut bmi: Vec<Option<f64>> = (0..n)
        .map(|_| Some(bmi_dist.sample(&mut rng).clamp(16.0, 50.0)))
        .collect();
    knock_out(&mut rng, &mut bmi, 0.05);

    let mut thickness: Vec<Option<f64>> = (0..n)
        .map(|_| Some(unit_normal.sample(&mut rng).exp().clamp(0.1, 15.0)))
        .collect();
    knock_out(&mut rng, &mut thickness, 0.10);

    // Ulceration is only recorded alongside a thickness measurement
    let ulceration: Vec<Option<f64>> = thickness
        .iter()
        .map(|t| t.map(|t| flag(&mut rng, logistic(t - 2.0))))
        .collect();

    let mut mitotic: Vec<Option<f64>> = thickness
        .iter()
        .map(|t| {
            let t = t.unwrap_or(f64::NAN);
            let value = (t * 0.8 + unit_normal.sample(&mut rng)).round();
            value.is_finite().then(|| value.clamp(0.0, 10.0))
        })
        .collect();
    knock_out(&mut rng, &mut mitotic, 0.15);

    let sites: Vec<&str> = (0..n).map(|_| pick_site(&mut rng)).collect();

    let mut slnd: Vec<Option<f64>> = thickness
        .iter()
        .map(|t| t.map(|t| flag(&mut rng, logistic((t - 0.8) * 2.0))))
        .collect();
    knock_out(&mut rng, &mut slnd, 0.30);
    let pos_slnd: Vec<Option<f64>> = slnd
        .iter()
        .map(|s| s.map(|s| if s == 1.0 { flag(&mut rng, 0.2) } else { 0.0 }))
        .collect();
    let pos_slnd_clnd: Vec<Option<f64>> = pos_slnd
        .iter()
        .map(|p| p.map(|p| if p == 1.0 { flag(&mut rng, 0.7) } else { 0.0 }))
        .collect();

    // Complication risk rises with age, BMI and thickness
    let mut comp: Vec<[Vec<i32>; 2]> = (0..=COMPLICATIONS.len())
        .map(|_| [vec![0; n], vec![0; n]])
        .collect();
    for i in 0..n {
        let age_factor = (ages[i] - 50.0) / 50.0;
        let base = match (bmi[i], thickness[i]) {
            (Some(b), Some(t)) => 0.08 + 0.02 * age_factor + 0.03 * (b - 25.0) / 10.0 + 0.03 * t / 3.0,
            _ => 0.08 + 0.02 * age_factor,
        }
        .clamp(0.01, 0.5);

        if rng.gen::<f64>() >= base {
            continue;
        }
        let grade = if rng.gen::<f64>() < 0.2 { 1 } else { 0 };
        comp[0][grade][i] = 1;
        for (k, (_, p)) in COMPLICATIONS.iter().enumerate() {
            if rng.gen::<f64>() < *p {
                comp[k + 1][grade][i] = 1;
            }
        }
    }

    let date_strings: Vec<String> = dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect();
    let mut df = df!(
        "eventId" => event_ids,
        "userId" => user_ids,
        "surgDate" => date_strings,
        "yos" => yos,
        "age" => ages,
        "female" => female,
        "bmi" => bmi,
        "thickness" => thickness,
        "ulceration" => ulceration,
        "mitoticIndex" => mitotic,
        "site" => sites,
        "slnd" => slnd,
        "posSlnd" => pos_slnd,
        "posSlndClnd" => pos_slnd_clnd,
    )?;

    let stems = std::iter::once("anyComp").chain(COMPLICATIONS.iter().map(|(s, _)| *s));
    for (stem, grades) in stems.zip(comp) {
        let [grade2, grade3] = grades;
        df.with_column(Column::new(format!("{stem}2").into(), grade2))?;
        df.with_column(Column::new(format!("{stem}3").into(), grade3))?;
    }

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulationConfig {
        SimulationConfig {
            n_patients: 200,
            seed: 11,
            ..Default::default()
        }
    }

    #[test]
    fn test_shape_and_columns() {
        let df = simulate_procedures(&small()).unwrap();
        assert_eq!(df.height(), 200);
        for col in ["eventId", "userId", "surgDate", "yos", "thickness", "posSlndClnd", "graftComp3"] {
            assert!(df.column(col).is_ok(), "missing column {col}");
        }
    }

    #[test]
    fn test_seeded_runs_match() {
        let a = simulate_procedures(&small()).unwrap();
        let b = simulate_procedures(&small()).unwrap();
        assert!(a.equals_missing(&b));
    }

    #[test]
    fn test_gaps_follow_thickness() {
        let df = simulate_procedures(&small()).unwrap();
        assert_eq!(df.column("thickness").unwrap().null_count(), 20);
        assert_eq!(df.column("bmi").unwrap().null_count(), 10);
        // Ulceration is missing exactly where thickness is
        assert_eq!(
            df.column("ulceration").unwrap().null_count(),
            df.column("thickness").unwrap().null_count()
        );
    }

    #[test]
    fn test_rejects_empty_range() {
        let config = SimulationConfig {
            end: NaiveDate::from_ymd_opt(2003, 1, 1).unwrap(),
            ..small()
        };
        assert!(simulate_procedures(&config).is_err());
    }
}
