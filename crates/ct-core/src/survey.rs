//! Per-site survey state machine.
//!
//! Turns one site's time-ordered, classified detections into closed
//! surveys. Each survey is a run of contiguous intervals starting at a
//! primary detection: every secondary detection ends an event interval,
//! and exactly one terminal interval closes the survey.
//!
//! # Transitions
//!
//! | state  | category            | action                                         |
//! |--------|---------------------|------------------------------------------------|
//! | closed | primary             | open a survey at the detection                 |
//! | closed | secondary, tertiary | dropped, no survey to attach to                |
//! | open   | primary             | close (`RetriggeredByPrimary`), open a new one |
//! | open   | secondary           | event interval, cursor advances                |
//! | open   | tertiary            | close (`CensoredByTertiary`)                   |
//! | any    | ignored             | no-op                                          |
//!
//! Before a detection reaches an open survey, the survey is closed
//! administratively if the detection lies beyond its cap,
//! `min(start + survey_duration, survey_end_date)`. Surveys still open
//! when the detections run out close at the cap as well.

use std::ops::AddAssign;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::types::SiteId;

/// Where the study end date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndDateSource {
    /// Supplied by the caller.
    Configured,
    /// Defaulted to the latest timestamp in the input.
    Data,
}

/// Run-wide parameters, resolved once and shared read-only by every site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParameters {
    /// Administrative cap on a survey's length, measured from its start.
    pub survey_duration: Duration,
    /// No survey extends past this instant.
    pub survey_end_date: DateTime<Utc>,
    pub end_date_source: EndDateSource,
}

impl RunParameters {
    /// Closure reason used when the study end date is the binding bound.
    const fn end_date_reason(&self) -> ClosureReason {
        match self.end_date_source {
            EndDateSource::Configured => ClosureReason::StudyEndDate,
            EndDateSource::Data => ClosureReason::EndOfData,
        }
    }

    /// The administrative cap for a survey started at `start`, and the
    /// reason a survey closed there would carry. Ties go to the duration.
    pub fn cap(&self, start: DateTime<Utc>) -> (DateTime<Utc>, ClosureReason) {
        let duration_cap = start
            .checked_add_signed(self.survey_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if duration_cap <= self.survey_end_date {
            (duration_cap, ClosureReason::AdministrativeDurationLimit)
        } else {
            (self.survey_end_date, self.end_date_reason())
        }
    }
}

/// Why a survey closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureReason {
    RetriggeredByPrimary,
    CensoredByTertiary,
    AdministrativeDurationLimit,
    StudyEndDate,
    EndOfData,
}

impl ClosureReason {
    /// Survey-level censoring status: 1 only for tertiary censoring.
    pub const fn status(self) -> u8 {
        match self {
            Self::CensoredByTertiary => 1,
            Self::RetriggeredByPrimary
            | Self::AdministrativeDurationLimit
            | Self::StudyEndDate
            | Self::EndOfData => 0,
        }
    }
}

impl std::fmt::Display for ClosureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RetriggeredByPrimary => "retriggered_by_primary",
            Self::CensoredByTertiary => "censored_by_tertiary",
            Self::AdministrativeDurationLimit => "administrative_duration_limit",
            Self::StudyEndDate => "study_end_date",
            Self::EndOfData => "end_of_data",
        };
        write!(f, "{s}")
    }
}

/// A detection reduced to what the state machine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedDetection {
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    /// Input row, kept for tracing.
    pub row: usize,
}

/// One `[start, stop)` interval of a survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// True when the interval ends in a secondary detection.
    pub event: bool,
}

impl Interval {
    pub fn is_zero_length(&self) -> bool {
        self.start == self.stop
    }
}

/// A finished survey. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSurvey {
    /// 1-based position among the site's surveys.
    pub ordinal: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub closure_reason: ClosureReason,
    /// Event intervals followed by the single terminal interval.
    pub intervals: Vec<Interval>,
    /// The administrative cap coincided with the last event time.
    pub degenerate_cap: bool,
}

impl ClosedSurvey {
    pub const fn status(&self) -> u8 {
        self.closure_reason.status()
    }

    /// Number of secondary events recorded in the survey.
    pub fn event_count(&self) -> usize {
        self.intervals.len() - 1
    }
}

/// How a site's detections were consumed. Every detection lands in
/// exactly one bucket, so the fields sum to `detections`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounts {
    pub detections: usize,
    /// Primary detections that opened a survey (including retriggers).
    pub survey_starts: usize,
    /// Secondary detections recorded as events.
    pub events: usize,
    /// Tertiary detections that censored a survey.
    pub censorings: usize,
    /// Secondary or tertiary detections with no open survey.
    pub unmatched: usize,
    /// Detections after the study end date with no open survey.
    pub outside_window: usize,
    pub ignored: usize,
}

impl ScanCounts {
    /// Sum of all buckets; equals `detections` for a consistent scan.
    pub const fn accounted(&self) -> usize {
        self.survey_starts
            + self.events
            + self.censorings
            + self.unmatched
            + self.outside_window
            + self.ignored
    }
}

impl AddAssign for ScanCounts {
    fn add_assign(&mut self, other: Self) {
        self.detections += other.detections;
        self.survey_starts += other.survey_starts;
        self.events += other.events;
        self.censorings += other.censorings;
        self.unmatched += other.unmatched;
        self.outside_window += other.outside_window;
        self.ignored += other.ignored;
    }
}

/// Output of scanning one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteScan {
    pub site_id: SiteId,
    pub surveys: Vec<ClosedSurvey>,
    pub counts: ScanCounts,
}

/// Survey state at a site.
#[derive(Debug)]
enum SurveyState {
    Closed,
    Open(OpenSurvey),
}

/// A survey accepting events.
#[derive(Debug)]
struct OpenSurvey {
    start: DateTime<Utc>,
    /// Start of the next interval.
    last_event_time: DateTime<Utc>,
    enum_counter: u32,
    intervals: Vec<Interval>,
}

impl OpenSurvey {
    const fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            last_event_time: start,
            enum_counter: 0,
            intervals: Vec::new(),
        }
    }

    fn record_event(&mut self, at: DateTime<Utc>) {
        self.intervals.push(Interval {
            start: self.last_event_time,
            stop: at,
            event: true,
        });
        self.enum_counter += 1;
        self.last_event_time = at;
    }

    fn close(mut self, at: DateTime<Utc>, reason: ClosureReason, ordinal: usize) -> ClosedSurvey {
        self.intervals.push(Interval {
            start: self.last_event_time,
            stop: at,
            event: false,
        });
        ClosedSurvey {
            ordinal,
            start: self.start,
            end: at,
            closure_reason: reason,
            intervals: self.intervals,
            degenerate_cap: false,
        }
    }
}

struct SiteScanner<'a> {
    site_id: &'a SiteId,
    params: &'a RunParameters,
    state: SurveyState,
    surveys: Vec<ClosedSurvey>,
    counts: ScanCounts,
}

impl<'a> SiteScanner<'a> {
    fn new(site_id: &'a SiteId, params: &'a RunParameters) -> Self {
        Self {
            site_id,
            params,
            state: SurveyState::Closed,
            surveys: Vec::new(),
            counts: ScanCounts::default(),
        }
    }

    fn next_ordinal(&self) -> usize {
        self.surveys.len() + 1
    }

    fn open(&mut self, at: DateTime<Utc>) -> SurveyState {
        self.counts.survey_starts += 1;
        SurveyState::Open(OpenSurvey::new(at))
    }

    fn close(&mut self, open: OpenSurvey, at: DateTime<Utc>, reason: ClosureReason) {
        tracing::trace!(
            site = %self.site_id,
            ordinal = self.next_ordinal(),
            %reason,
            events = open.enum_counter,
            "survey closed"
        );
        let survey = open.close(at, reason, self.next_ordinal());
        self.surveys.push(survey);
    }

    /// Closes the open survey, if any, at its administrative cap.
    fn close_administratively(&mut self) {
        let SurveyState::Open(open) = std::mem::replace(&mut self.state, SurveyState::Closed) else {
            return;
        };

        let (cap, reason) = self.params.cap(open.start);
        let degenerate = cap <= open.last_event_time;
        let at = if degenerate { open.last_event_time } else { cap };
        self.close(open, at, reason);
        if degenerate {
            if let Some(survey) = self.surveys.last_mut() {
                survey.degenerate_cap = true;
            }
        }
    }

    fn step(&mut self, detection: &ClassifiedDetection) {
        let ts = detection.timestamp;
        self.counts.detections += 1;

        let past_cap = match &self.state {
            SurveyState::Open(open) => ts > self.params.cap(open.start).0,
            SurveyState::Closed => false,
        };
        if past_cap {
            self.close_administratively();
        }

        let in_window = ts <= self.params.survey_end_date;
        let state = std::mem::replace(&mut self.state, SurveyState::Closed);
        self.state = match (state, detection.category) {
            (state, Category::Ignored) => {
                self.counts.ignored += 1;
                state
            }
            (SurveyState::Closed, _) if !in_window => {
                self.counts.outside_window += 1;
                SurveyState::Closed
            }
            (SurveyState::Closed, Category::Primary) => self.open(ts),
            (SurveyState::Closed, Category::Secondary | Category::Tertiary) => {
                self.counts.unmatched += 1;
                SurveyState::Closed
            }
            (SurveyState::Open(open), Category::Primary) => {
                self.close(open, ts, ClosureReason::RetriggeredByPrimary);
                self.open(ts)
            }
            (SurveyState::Open(mut open), Category::Secondary) => {
                open.record_event(ts);
                self.counts.events += 1;
                SurveyState::Open(open)
            }
            (SurveyState::Open(open), Category::Tertiary) => {
                self.close(open, ts, ClosureReason::CensoredByTertiary);
                self.counts.censorings += 1;
                SurveyState::Closed
            }
        };

        tracing::trace!(
            site = %self.site_id,
            row = detection.row,
            category = %detection.category,
            open = matches!(self.state, SurveyState::Open(_)),
            "detection applied"
        );
    }

    fn finish(mut self) -> SiteScan {
        self.close_administratively();
        SiteScan {
            site_id: self.site_id.clone(),
            surveys: self.surveys,
            counts: self.counts,
        }
    }
}

/// Scans one site's detections, which must be in non-decreasing
/// timestamp order. Equal timestamps are applied in slice order.
pub fn scan_site(
    site_id: &SiteId,
    detections: &[ClassifiedDetection],
    params: &RunParameters,
) -> SiteScan {
    debug_assert!(
        detections.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
        "detections must be sorted by timestamp"
    );

    let mut scanner = SiteScanner::new(site_id, params);
    for detection in detections {
        scanner.step(detection);
    }
    let scan = scanner.finish();

    tracing::debug!(
        site = %site_id,
        detections = scan.counts.detections,
        surveys = scan.surveys.len(),
        "site scanned"
    );
    scan
}
