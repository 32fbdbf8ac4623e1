//! Assembly of per-site scans into the final recurrent-event table.
//!
//! Runs after every site has been scanned: survey ids and the global
//! survey index are assigned here, single-threaded, so no counter is ever
//! shared between workers.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::detection::site_from_value;
use crate::error::{DegenerateCause, JoinError, TransformWarning};
use crate::survey::{ClosedSurvey, ClosureReason, ScanCounts, SiteScan};
use crate::time::days_between;
use crate::types::{SiteId, SurveyId};

/// Output columns a covariate may not shadow.
pub const RESERVED_COLUMNS: [&str; 10] = [
    "site_id",
    "survey_id",
    "survey_index",
    "t_start",
    "t_stop",
    "start_at",
    "stop_at",
    "event",
    "status",
    "enum",
];

/// Static per-site covariates supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CovariateTable {
    /// Column holding the site identifier.
    pub site_column: String,
    pub rows: Vec<Map<String, Value>>,
}

impl CovariateTable {
    pub fn new(site_column: impl Into<String>) -> Self {
        Self {
            site_column: site_column.into(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Map<String, Value>) {
        self.rows.push(row);
    }
}

/// Covariates keyed by site, ready for a left join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CovariateIndex {
    by_site: BTreeMap<SiteId, BTreeMap<String, Value>>,
}

impl CovariateIndex {
    /// Indexes a covariate table.
    ///
    /// Repeated rows for a site are merged. Two different values for the
    /// same site and column make the join ambiguous and fail.
    pub fn build(table: &CovariateTable) -> Result<Self, JoinError> {
        let mut by_site: BTreeMap<SiteId, BTreeMap<String, Value>> = BTreeMap::new();

        for (row, values) in table.rows.iter().enumerate() {
            let site = values
                .get(&table.site_column)
                .and_then(site_from_value)
                .ok_or_else(|| JoinError::MissingSite {
                    row,
                    column: table.site_column.clone(),
                })?;

            let covariates = by_site.entry(site.clone()).or_default();
            for (column, value) in values {
                if *column == table.site_column {
                    continue;
                }
                if RESERVED_COLUMNS.contains(&column.as_str()) {
                    return Err(JoinError::ReservedColumn {
                        column: column.clone(),
                    });
                }
                match covariates.get(column) {
                    Some(existing) if existing != value => {
                        return Err(JoinError::ConflictingValues {
                            site,
                            column: column.clone(),
                            first: existing.to_string(),
                            second: value.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        covariates.insert(column.clone(), value.clone());
                    }
                }
            }
        }

        tracing::debug!(sites = by_site.len(), "indexed site covariates");
        Ok(Self { by_site })
    }

    pub fn get(&self, site: &SiteId) -> Option<&BTreeMap<String, Value>> {
        self.by_site.get(site)
    }

    pub fn len(&self) -> usize {
        self.by_site.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_site.is_empty()
    }
}

/// One output row: a `[t_start, t_stop)` interval of a survey.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurrentEventRecord {
    pub site_id: SiteId,
    pub survey_id: SurveyId,
    /// 1-based position of the survey in the whole table.
    pub survey_index: usize,
    /// Interval start, in fractional days since the survey started.
    pub t_start: f64,
    /// Interval stop, in fractional days since the survey started.
    pub t_stop: f64,
    pub start_at: DateTime<Utc>,
    pub stop_at: DateTime<Utc>,
    /// 1 when the interval ends in a secondary detection, 0 when censored.
    pub event: u8,
    /// Survey-level censoring status, equal on every record of a survey.
    pub status: u8,
    /// 1-based sequence number within the survey.
    #[serde(rename = "enum")]
    pub sequence: u32,
    #[serde(flatten)]
    pub covariates: BTreeMap<String, Value>,
}

/// One row per survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveySummary {
    pub survey_id: SurveyId,
    pub survey_index: usize,
    pub site_id: SiteId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub closure_reason: ClosureReason,
    pub event_count: usize,
    pub status: u8,
    /// The survey closed with a zero-length administrative record.
    pub degenerate: bool,
}

/// Run totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransformStats {
    pub sites: usize,
    /// Sites with at least one survey.
    pub sites_surveyed: usize,
    pub surveys: usize,
    pub records: usize,
    #[serde(flatten)]
    pub counts: ScanCounts,
}

/// The assembled output of a transform run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecurrentEventTable {
    pub records: Vec<RecurrentEventRecord>,
    pub surveys: Vec<SurveySummary>,
    pub warnings: Vec<TransformWarning>,
    pub stats: TransformStats,
}

impl RecurrentEventTable {
    /// Records of one survey, in `enum` order.
    pub fn records_for_survey<'a>(
        &'a self,
        survey_id: &'a SurveyId,
    ) -> impl Iterator<Item = &'a RecurrentEventRecord> + 'a {
        self.records.iter().filter(move |r| &r.survey_id == survey_id)
    }

    /// Fixed-width text rendering of the core columns.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<8} {:<10} {:>8} {:>8} {:>5} {:>6} {:>4}",
            "site_id", "survey_id", "t_start", "t_stop", "event", "status", "enum"
        );
        for r in &self.records {
            let _ = writeln!(
                out,
                "{:<8} {:<10} {:>8.3} {:>8.3} {:>5} {:>6} {:>4}",
                r.site_id.as_str(),
                r.survey_id.as_str(),
                r.t_start,
                r.t_stop,
                r.event,
                r.status,
                r.sequence
            );
        }
        out
    }
}

/// Merges per-site scans and joins covariates.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    covariates: CovariateIndex,
}

impl Assembler {
    pub const fn new(covariates: CovariateIndex) -> Self {
        Self { covariates }
    }

    /// Builds the output table. Sites are emitted in ascending id order,
    /// regardless of the order the scans arrive in.
    pub fn assemble(&self, mut scans: Vec<SiteScan>) -> RecurrentEventTable {
        scans.sort_by(|a, b| a.site_id.cmp(&b.site_id));

        let mut table = RecurrentEventTable::default();
        let mut survey_index = 0;

        for scan in scans {
            table.stats.sites += 1;
            table.stats.counts += scan.counts;
            if !scan.surveys.is_empty() {
                table.stats.sites_surveyed += 1;
            }

            let empty = BTreeMap::new();
            let covariates = self.covariates.get(&scan.site_id).unwrap_or(&empty);

            for survey in &scan.surveys {
                survey_index += 1;
                let survey_id = SurveyId::for_site(&scan.site_id, survey.ordinal);
                push_survey(
                    &mut table,
                    &scan.site_id,
                    &survey_id,
                    survey_index,
                    survey,
                    covariates,
                );
            }
        }

        table.stats.surveys = table.surveys.len();
        table.stats.records = table.records.len();
        tracing::info!(
            sites = table.stats.sites,
            surveys = table.stats.surveys,
            records = table.stats.records,
            warnings = table.warnings.len(),
            "assembled recurrent-event table"
        );
        table
    }
}

fn push_survey(
    table: &mut RecurrentEventTable,
    site_id: &SiteId,
    survey_id: &SurveyId,
    survey_index: usize,
    survey: &ClosedSurvey,
    covariates: &BTreeMap<String, Value>,
) {
    let status = survey.status();

    for (idx, interval) in survey.intervals.iter().enumerate() {
        let sequence = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        let is_terminal = idx + 1 == survey.intervals.len();
        if interval.is_zero_length() {
            let cause = if is_terminal && survey.degenerate_cap {
                DegenerateCause::AdministrativeCap
            } else {
                DegenerateCause::SimultaneousDetections
            };
            tracing::warn!(
                site = %site_id,
                survey = %survey_id,
                sequence,
                at = %interval.start,
                ?cause,
                "zero-length interval emitted"
            );
            table.warnings.push(TransformWarning::DegenerateInterval {
                site_id: site_id.clone(),
                survey_id: survey_id.clone(),
                sequence,
                at: interval.start,
                cause,
            });
        }

        table.records.push(RecurrentEventRecord {
            site_id: site_id.clone(),
            survey_id: survey_id.clone(),
            survey_index,
            t_start: days_between(survey.start, interval.start),
            t_stop: days_between(survey.start, interval.stop),
            start_at: interval.start,
            stop_at: interval.stop,
            event: u8::from(interval.event),
            status,
            sequence,
            covariates: covariates.clone(),
        });
    }

    table.surveys.push(SurveySummary {
        survey_id: survey_id.clone(),
        survey_index,
        site_id: site_id.clone(),
        start: survey.start,
        end: survey.end,
        closure_reason: survey.closure_reason,
        event_count: survey.event_count(),
        status,
        degenerate: survey.degenerate_cap,
    });
}
