//! Model grid enumeration
//!
//! Expands outcome definitions, severity strata and procedure dates into the
//! list of independent [`ModelSpecification`]s a run estimates. Enumeration is
//! pure: the same table always yields the same set of model identifiers.

use std::collections::HashSet;

use chrono::{NaiveDate, TimeDelta};
use serde::Serialize;

use super::error::RateError;
use super::loader::ProcedureTable;

/// Complication categories tracked for melanoma excisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComplicationType {
    Any,
    Wound,
    Cellulitis,
    Seroma,
    Graft,
}

impl ComplicationType {
    pub const ALL: [ComplicationType; 5] = [
        ComplicationType::Any,
        ComplicationType::Wound,
        ComplicationType::Cellulitis,
        ComplicationType::Seroma,
        ComplicationType::Graft,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ComplicationType::Any => "ANY",
            ComplicationType::Wound => "WOUND",
            ComplicationType::Cellulitis => "CELLULITIS",
            ComplicationType::Seroma => "SEROMA",
            ComplicationType::Graft => "GRAFT",
        }
    }

    /// Outcome column name without the grade suffix
    pub fn column_stem(&self) -> &'static str {
        match self {
            ComplicationType::Any => "anyComp",
            ComplicationType::Wound => "woundInf",
            ComplicationType::Cellulitis => "cellulitis",
            ComplicationType::Seroma => "seroma",
            ComplicationType::Graft => "graftComp",
        }
    }
}

/// One outcome the grid estimates rates for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OutcomeDefinition {
    /// Leading part of the model identifier, e.g. `COMP.ANY.COMPGRADE2`
    pub tag: String,
    /// Binary outcome column
    pub column: String,
    /// Flag column that must equal 1 for a row to be eligible
    pub prerequisite: Option<String>,
}

impl OutcomeDefinition {
    pub fn new(tag: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            column: column.into(),
            prerequisite: None,
        }
    }

    pub fn requiring(mut self, flag: impl Into<String>) -> Self {
        self.prerequisite = Some(flag.into());
        self
    }

    /// Complication outcome for one type and grade
    pub fn complication(kind: ComplicationType, grade: u8) -> Self {
        Self::new(
            format!("COMP.{}.COMPGRADE{}", kind.tag(), grade),
            format!("{}{}", kind.column_stem(), grade),
        )
    }
}

/// The ordered set of outcomes a run covers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutcomeCatalog {
    outcomes: Vec<OutcomeDefinition>,
}

impl OutcomeCatalog {
    pub fn new(outcomes: Vec<OutcomeDefinition>) -> Self {
        Self { outcomes }
    }

    /// Cross product of complication types and grades, types outermost.
    pub fn complications(types: &[ComplicationType], grades: &[u8]) -> Self {
        let outcomes = types
            .iter()
            .flat_map(|&kind| {
                grades
                    .iter()
                    .map(move |&grade| OutcomeDefinition::complication(kind, grade))
            })
            .collect();
        Self { outcomes }
    }

    /// Complications at grades 2 and 3, then the nodal staging outcomes.
    pub fn melanoma() -> Self {
        let mut catalog = Self::complications(&ComplicationType::ALL, &[2, 3]);
        catalog.push(OutcomeDefinition::new("SLND", "slnd"));
        catalog.push(OutcomeDefinition::new("POSSLND", "posSlnd").requiring("slnd"));
        catalog.push(OutcomeDefinition::new("CLND", "posSlndClnd").requiring("posSlnd"));
        catalog
    }

    pub fn push(&mut self, outcome: OutcomeDefinition) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[OutcomeDefinition] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcome and prerequisite columns, deduplicated in first-use order.
    pub fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = Vec::new();
        for outcome in &self.outcomes {
            for col in std::iter::once(&outcome.column).chain(outcome.prerequisite.as_ref()) {
                if !cols.contains(col) {
                    cols.push(col.clone());
                }
            }
        }
        cols
    }
}

/// Tumour thickness bands used to stratify every outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ThicknessBand {
    All,
    LessThanPt8,
    Pt8To1,
    GreaterThan1,
}

impl ThicknessBand {
    pub const ALL: [ThicknessBand; 4] = [
        ThicknessBand::All,
        ThicknessBand::LessThanPt8,
        ThicknessBand::Pt8To1,
        ThicknessBand::GreaterThan1,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ThicknessBand::All => "ALLLENGTH",
            ThicknessBand::LessThanPt8 => "LESSTHANPT8MM",
            ThicknessBand::Pt8To1 => "PT8MMTO1MM",
            ThicknessBand::GreaterThan1 => "GRTHAN1MM",
        }
    }

    /// Whether an observed thickness falls in this band.
    ///
    /// Rows with unknown thickness only belong to `All`.
    pub fn admits(&self, thickness: Option<f64>) -> bool {
        match (self, thickness) {
            (ThicknessBand::All, _) => true,
            (_, None) => false,
            (ThicknessBand::LessThanPt8, Some(t)) => t < 0.8,
            (ThicknessBand::Pt8To1, Some(t)) => (0.8..=1.0).contains(&t),
            (ThicknessBand::GreaterThan1, Some(t)) => t > 1.0,
        }
    }
}

/// One independent estimation task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ModelSpecification {
    pub model_id: String,
    pub outcome: OutcomeDefinition,
    pub stratum: ThicknessBand,
    /// Last procedure date inside the window
    pub window_end: NaiveDate,
}

impl ModelSpecification {
    pub fn new(outcome: OutcomeDefinition, stratum: ThicknessBand, window_end: NaiveDate) -> Self {
        let model_id = format!(
            "{}.{}.{}",
            outcome.tag,
            stratum.tag(),
            window_tag(window_end)
        );
        Self {
            model_id,
            outcome,
            stratum,
            window_end,
        }
    }

    pub fn window_tag(&self) -> String {
        window_tag(self.window_end)
    }

    /// Whether a procedure date falls in this window.
    pub fn in_window(&self, date: NaiveDate, lookback_days: Option<i64>) -> bool {
        if date > self.window_end {
            return false;
        }
        match lookback_days {
            // A lookback reaching past the calendar has no lower bound
            Some(days) => TimeDelta::try_days(days)
                .and_then(|span| self.window_end.checked_sub_signed(span))
                .map_or(true, |start| date > start),
            None => true,
        }
    }

    /// Rows eligible for this specification.
    ///
    /// Only date, observed stratification value and the prerequisite flag
    /// decide membership, never imputed covariates, so every imputation sees
    /// the same rows.
    pub fn eligible_rows(
        &self,
        table: &ProcedureTable,
        stratify_by: &str,
        lookback_days: Option<i64>,
    ) -> Vec<usize> {
        let strata = table.column(stratify_by);
        let prerequisite = self
            .outcome
            .prerequisite
            .as_deref()
            .and_then(|flag| table.column(flag));

        (0..table.len())
            .filter(|&i| self.in_window(table.dates[i], lookback_days))
            .filter(|&i| {
                let thickness = strata.and_then(|values| values[i]);
                self.stratum.admits(thickness)
            })
            .filter(|&i| match (&self.outcome.prerequisite, prerequisite) {
                (None, _) => true,
                (Some(_), Some(flags)) => flags[i] == Some(1.0),
                (Some(_), None) => false,
            })
            .collect()
    }
}

/// `DATE20180131` style window tag
pub fn window_tag(date: NaiveDate) -> String {
    format!("DATE{}", date.format("%Y%m%d"))
}

/// Build the full model grid for a table.
///
/// Order is outcome, then stratum, then date in first-appearance order.
/// Fails if two specifications would share an identifier.
pub fn enumerate_models(
    catalog: &OutcomeCatalog,
    table: &ProcedureTable,
) -> Result<Vec<ModelSpecification>, RateError> {
    enumerate_for_dates(catalog, &table.distinct_dates())
}

/// Same as [`enumerate_models`] for an explicit date list.
pub fn enumerate_for_dates(
    catalog: &OutcomeCatalog,
    dates: &[NaiveDate],
) -> Result<Vec<ModelSpecification>, RateError> {
    let mut specs = Vec::with_capacity(catalog.len() * ThicknessBand::ALL.len() * dates.len());
    let mut seen: HashSet<String> = HashSet::with_capacity(specs.capacity());

    for outcome in catalog.outcomes() {
        for stratum in ThicknessBand::ALL {
            for &date in dates {
                let spec = ModelSpecification::new(outcome.clone(), stratum, date);
                if !seen.insert(spec.model_id.clone()) {
                    return Err(RateError::DuplicateModel(spec.model_id));
                }
                specs.push(spec);
            }
        }
    }

    Ok(specs)
}
