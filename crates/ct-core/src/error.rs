//! Error taxonomy for survey transforms.
//!
//! Configuration, validation and join errors are all detected before any
//! site is scanned, so a failed run never yields a partial table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::category::Category;
use crate::types::{SiteId, Species, SurveyId};

/// Invalid caller configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The same species label was listed under two category roles.
    #[error("species {species} is listed as both {first} and {second}")]
    OverlappingCategories {
        species: Species,
        first: Category,
        second: Category,
    },

    /// No species can trigger a survey.
    #[error("primary species set cannot be empty")]
    EmptyPrimarySet,

    /// Survey duration was zero, negative or not finite.
    #[error("survey duration must be positive, got {value}")]
    NonPositiveDuration { value: String },

    /// Survey duration was positive but too large to represent.
    #[error("survey duration of {value} days is out of range")]
    DurationOutOfRange { value: String },

    /// A species label in a category set was blank.
    #[error("{role} species labels cannot be blank")]
    BlankSpeciesLabel { role: Category },

    /// A column name was configured that the input table does not have.
    #[error("configured {role} column {name:?} is not present in the input table")]
    UnknownColumn { role: &'static str, name: String },

    /// A column name was configured as an empty string.
    #[error("{role} column name cannot be empty")]
    EmptyColumnName { role: &'static str },
}

/// Malformed input data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The input table has no rows.
    #[error("input table has no rows")]
    EmptyInput,

    /// A required column is missing from the input table.
    #[error("required column {name:?} is missing from the input table")]
    MissingColumn { name: String },

    /// A row has no value (or null) for a required column.
    #[error("row {row}: missing value for column {column:?}")]
    MissingValue { row: usize, column: String },

    /// A row has a value of the wrong shape for its column.
    #[error("row {row}: invalid value {value} for column {column:?}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    /// A timestamp could not be parsed.
    #[error("row {row}: unparseable timestamp {value}")]
    UnparseableTimestamp { row: usize, value: String },

    /// Rows for a site are interleaved with rows for other sites.
    #[error("row {row}: site {site} reappears after rows for other sites")]
    NonContiguousSite { site: SiteId, row: usize },
}

/// Ambiguous or malformed covariate table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// Two covariate rows for one site disagree on a column.
    #[error("site {site}: conflicting values for covariate {column:?} ({first} vs {second})")]
    ConflictingValues {
        site: SiteId,
        column: String,
        first: String,
        second: String,
    },

    /// A covariate row has no usable site identifier.
    #[error("covariate row {row}: missing or invalid site value in column {column:?}")]
    MissingSite { row: usize, column: String },

    /// A covariate column would overwrite an output column.
    #[error("covariate column {column:?} clashes with an output column")]
    ReservedColumn { column: String },
}

/// Any error that aborts a transform run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("join error: {0}")]
    Join(#[from] JoinError),
}

/// Why a zero-length interval was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateCause {
    /// The administrative cap fell on or before the last event time.
    AdministrativeCap,
    /// Two detections of the survey shared the same instant.
    SimultaneousDetections,
}

/// Non-fatal conditions surfaced alongside the output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformWarning {
    /// A zero-length record was emitted. It is kept in the table.
    DegenerateInterval {
        site_id: SiteId,
        survey_id: SurveyId,
        #[serde(rename = "enum")]
        sequence: u32,
        at: DateTime<Utc>,
        cause: DegenerateCause,
    },
}

/// A broken output invariant, reported by [`RecurrentEventTable::verify`].
///
/// [`RecurrentEventTable::verify`]: crate::RecurrentEventTable::verify
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("survey {survey_id}: {rule}")]
pub struct InvariantViolation {
    pub survey_id: SurveyId,
    pub rule: String,
}
