//! Core domain logic for camera-trap survey tables.
//!
//! This crate turns timestamped, species-tagged detections at fixed sites
//! into a recurrent-event table for time-to-event analysis:
//! - Classification: mapping species labels to survey roles
//! - Survey scanning: the per-site state machine that opens, fills and
//!   closes surveys
//! - Assembly: survey ids, covariate joins and invariant checks

mod assemble;
pub mod category;
pub mod detection;
mod error;
pub mod survey;
pub mod time;
mod transform;
pub mod types;
mod verify;

pub use assemble::{
    Assembler, CovariateIndex, CovariateTable, RESERVED_COLUMNS, RecurrentEventRecord,
    RecurrentEventTable, SurveySummary, TransformStats,
};
pub use category::{Category, CategorySets, Classifier, TertiaryPolicy};
pub use detection::{ColumnNames, Detection, DetectionTable};
pub use error::{
    ConfigurationError, DegenerateCause, Error, InvariantViolation, JoinError, TransformWarning,
    ValidationError,
};
pub use survey::{ClosureReason, EndDateSource, RunParameters, ScanCounts};
pub use transform::{TransformConfig, transform, transform_detections};
pub use types::{SiteId, Species, SurveyId};
