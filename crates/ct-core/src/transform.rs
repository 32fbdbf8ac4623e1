//! Transform pipeline: validate, classify, scan per site, assemble.
//!
//! # Algorithm Summary
//!
//! 1. Validate configuration and every input row; fail before any site runs
//! 2. Resolve run-wide defaults once (tertiary complement, study end date)
//! 3. Group detections by site and stable-sort each group by timestamp
//! 4. Scan sites in parallel, each worker owning its site's survey state
//! 5. Assemble the per-site results and join site covariates

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;

use crate::assemble::{Assembler, CovariateIndex, CovariateTable, RecurrentEventTable};
use crate::category::{CategorySets, Classifier};
use crate::detection::{ColumnNames, Detection, DetectionTable, check_grouped_sites};
use crate::error::{ConfigurationError, Error, ValidationError};
use crate::survey::{ClassifiedDetection, EndDateSource, RunParameters, scan_site};
use crate::types::SiteId;

/// Configuration for a transform run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
    /// Names of the site, timestamp and species columns.
    pub columns: ColumnNames,

    /// Species sets for each category role.
    pub categories: CategorySets,

    /// Administrative cap on survey length. Must be positive.
    pub survey_duration: Duration,

    /// Study end date. Default: the latest timestamp in the input.
    pub survey_end_date: Option<DateTime<Utc>>,

    /// Reject tables whose rows for a site are not contiguous.
    /// Default: false.
    pub require_grouped_sites: bool,
}

impl TransformConfig {
    /// Creates a configuration with default columns and end date.
    pub fn new(categories: CategorySets, survey_duration: Duration) -> Self {
        Self {
            columns: ColumnNames::default(),
            categories,
            survey_duration,
            survey_end_date: None,
            require_grouped_sites: false,
        }
    }

    #[must_use]
    pub fn with_end_date(mut self, end: DateTime<Utc>) -> Self {
        self.survey_end_date = Some(end);
        self
    }

    #[must_use]
    pub fn with_columns(mut self, columns: ColumnNames) -> Self {
        self.columns = columns;
        self
    }

    /// Checks the parts of the configuration that do not depend on data.
    /// Runs before any row is parsed.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.survey_duration <= Duration::zero() {
            return Err(ConfigurationError::NonPositiveDuration {
                value: self.survey_duration.to_string(),
            });
        }
        self.categories.validate()
    }

    /// Resolves run-wide parameters against the full detection set.
    fn resolve(&self, detections: &[Detection]) -> Result<RunParameters, ValidationError> {
        let (survey_end_date, end_date_source) = match self.survey_end_date {
            Some(end) => (end, EndDateSource::Configured),
            None => {
                let latest = detections
                    .iter()
                    .map(|d| d.timestamp)
                    .max()
                    .ok_or(ValidationError::EmptyInput)?;
                (latest, EndDateSource::Data)
            }
        };
        Ok(RunParameters {
            survey_duration: self.survey_duration,
            survey_end_date,
            end_date_source,
        })
    }
}

/// Transforms a raw detection table into a recurrent-event table.
///
/// # Arguments
///
/// * `table` - Detections, one row each
/// * `config` - Columns, category sets and survey bounds
/// * `covariates` - Optional static site covariates to left-join
///
/// # Errors
///
/// Configuration, validation and join errors abort the run before any
/// site is processed.
pub fn transform(
    table: &DetectionTable,
    config: &TransformConfig,
    covariates: Option<&CovariateTable>,
) -> Result<RecurrentEventTable, Error> {
    config.validate()?;
    let detections = table.parse_detections(&config.columns)?;
    transform_detections(detections, config, covariates)
}

/// Transforms already-typed detections.
///
/// Detections with equal timestamps at a site are processed in slice
/// order.
pub fn transform_detections(
    detections: Vec<Detection>,
    config: &TransformConfig,
    covariates: Option<&CovariateTable>,
) -> Result<RecurrentEventTable, Error> {
    config.validate()?;
    if detections.is_empty() {
        return Err(ValidationError::EmptyInput.into());
    }
    if config.require_grouped_sites {
        check_grouped_sites(&detections)?;
    }

    let classifier = Classifier::new(&config.categories, detections.iter().map(|d| &d.species))?;
    let params = config.resolve(&detections)?;
    let covariates = covariates
        .map(CovariateIndex::build)
        .transpose()?
        .unwrap_or_default();

    let sites = group_by_site(detections, &classifier);
    tracing::info!(
        sites = sites.len(),
        end_date = %params.survey_end_date,
        end_date_source = ?params.end_date_source,
        duration_days = params.survey_duration.num_days(),
        "starting survey transform"
    );

    // Barrier: every site is scanned before assembly starts.
    let scans: Vec<_> = sites
        .par_iter()
        .map(|(site_id, detections)| scan_site(site_id, detections, &params))
        .collect();

    Ok(Assembler::new(covariates).assemble(scans))
}

/// Groups detections by site, each group stable-sorted by timestamp.
fn group_by_site(
    detections: Vec<Detection>,
    classifier: &Classifier,
) -> Vec<(SiteId, Vec<ClassifiedDetection>)> {
    let mut groups: BTreeMap<SiteId, Vec<ClassifiedDetection>> = BTreeMap::new();
    for detection in detections {
        let classified = ClassifiedDetection {
            timestamp: detection.timestamp,
            category: classifier.classify(&detection.species),
            row: detection.row,
        };
        groups.entry(detection.site_id).or_default().push(classified);
    }

    groups
        .into_iter()
        .map(|(site_id, mut group)| {
            group.sort_by_key(|d| d.timestamp);
            (site_id, group)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::TertiaryPolicy;
    use crate::types::Species;

    fn ts(days: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::days(days)
    }

    fn categories() -> CategorySets {
        CategorySets {
            primary: [Species::new("lynx").unwrap()].into(),
            secondary: [Species::new("roe_deer").unwrap()].into(),
            tertiary: TertiaryPolicy::Complement,
        }
    }

    fn detection(site: &str, day: i64, species: &str, row: usize) -> Detection {
        Detection {
            site_id: SiteId::new(site).unwrap(),
            timestamp: ts(day),
            species: Species::new(species).unwrap(),
            row,
        }
    }

    #[test]
    fn non_positive_duration_is_rejected_before_scanning() {
        let config = TransformConfig::new(categories(), Duration::zero());
        let result = transform_detections(vec![detection("S1", 0, "lynx", 0)], &config, None);
        assert!(matches!(
            result,
            Err(Error::Configuration(ConfigurationError::NonPositiveDuration { .. }))
        ));
    }

    #[test]
    fn end_date_defaults_to_latest_detection() {
        let config = TransformConfig::new(categories(), Duration::days(30));
        let detections = vec![detection("S1", 0, "lynx", 0), detection("S2", 12, "fox", 1)];
        let params = config.resolve(&detections).unwrap();
        assert_eq!(params.survey_end_date, ts(12));
        assert_eq!(params.end_date_source, EndDateSource::Data);

        let config = config.with_end_date(ts(50));
        assert_eq!(config.resolve(&detections).unwrap().survey_end_date, ts(50));
    }

    #[test]
    fn groups_are_sorted_stably_by_time() {
        let classifier = Classifier::new(&categories(), std::iter::empty()).unwrap();
        let detections = vec![
            detection("S2", 5, "lynx", 0),
            detection("S1", 3, "roe_deer", 1),
            detection("S1", 1, "lynx", 2),
            detection("S1", 3, "lynx", 3),
        ];

        let groups = group_by_site(detections, &classifier);
        let s1: Vec<_> = groups[0].1.iter().map(|d| d.row).collect();
        assert_eq!(groups[0].0.as_str(), "S1");
        assert_eq!(s1, vec![2, 1, 3]);
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn grouped_site_requirement_is_enforced() {
        let mut config = TransformConfig::new(categories(), Duration::days(30));
        config.require_grouped_sites = true;
        let detections = vec![
            detection("S1", 0, "lynx", 0),
            detection("S2", 0, "lynx", 1),
            detection("S1", 1, "roe_deer", 2),
        ];
        assert!(matches!(
            transform_detections(detections, &config, None),
            Err(Error::Validation(ValidationError::NonContiguousSite { row: 2, .. }))
        ));
    }
}
