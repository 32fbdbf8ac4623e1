//! Output invariant checks.
//!
//! The downstream piece-wise exponential step relies on these holding for
//! every survey; `verify` lets callers (and tests) confirm them on any
//! table, including one that was edited after assembly.

use std::collections::{BTreeMap, HashSet};

use crate::assemble::{RecurrentEventRecord, RecurrentEventTable};
use crate::error::InvariantViolation;
use crate::survey::RunParameters;
use crate::types::SurveyId;

impl RecurrentEventTable {
    /// Checks every survey's records against the output invariants.
    ///
    /// Returns the first violation found.
    pub fn verify(&self, params: &RunParameters) -> Result<(), InvariantViolation> {
        let mut seen: HashSet<&SurveyId> = HashSet::new();
        for summary in &self.surveys {
            if !seen.insert(&summary.survey_id) {
                return Err(violation(&summary.survey_id, "survey id is not unique"));
            }
        }

        let mut by_survey: BTreeMap<&SurveyId, Vec<&RecurrentEventRecord>> = BTreeMap::new();
        for record in &self.records {
            if !seen.contains(&record.survey_id) {
                return Err(violation(&record.survey_id, "record has no survey summary"));
            }
            by_survey.entry(&record.survey_id).or_default().push(record);
        }

        for summary in &self.surveys {
            let records = by_survey
                .get(&summary.survey_id)
                .map_or(&[][..], Vec::as_slice);
            check_survey(&summary.survey_id, records, params)?;
        }
        Ok(())
    }
}

#[expect(
    clippy::float_cmp,
    reason = "relative times are derived from exact instants, so equal instants give equal floats"
)]
fn check_survey(
    survey_id: &SurveyId,
    records: &[&RecurrentEventRecord],
    params: &RunParameters,
) -> Result<(), InvariantViolation> {
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Err(violation(survey_id, "survey has no records"));
    };

    if first.t_start != 0.0 {
        return Err(violation(survey_id, "first record does not start at 0"));
    }

    for (expected, record) in (1_u32..).zip(records) {
        if record.sequence != expected {
            return Err(violation(
                survey_id,
                &format!("enum {} found where {expected} was expected", record.sequence),
            ));
        }
        if record.stop_at < record.start_at {
            return Err(violation(survey_id, "record stops before it starts"));
        }
        if record.status != first.status {
            return Err(violation(survey_id, "status differs between records"));
        }
    }

    for pair in records.windows(2) {
        if pair[0].stop_at != pair[1].start_at || pair[0].t_stop != pair[1].t_start {
            return Err(violation(
                survey_id,
                &format!("gap between enum {} and {}", pair[0].sequence, pair[1].sequence),
            ));
        }
    }

    let terminal = records.iter().filter(|r| r.event == 0).count();
    if terminal != 1 || last.event != 0 {
        return Err(violation(
            survey_id,
            "survey must end with exactly one censoring record",
        ));
    }

    if last.stop_at - first.start_at > params.survey_duration {
        return Err(violation(survey_id, "survey exceeds the duration cap"));
    }
    if last.stop_at > params.survey_end_date {
        return Err(violation(survey_id, "survey runs past the study end date"));
    }
    Ok(())
}

fn violation(survey_id: &SurveyId, rule: &str) -> InvariantViolation {
    InvariantViolation {
        survey_id: survey_id.clone(),
        rule: rule.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::Assembler;
    use crate::survey::{ClosedSurvey, ClosureReason, EndDateSource, Interval, ScanCounts, SiteScan};
    use crate::types::SiteId;
    use chrono::{DateTime, Duration, Utc};

    fn ts(days: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::days(days)
    }

    fn params() -> RunParameters {
        RunParameters {
            survey_duration: Duration::days(30),
            survey_end_date: ts(100),
            end_date_source: EndDateSource::Configured,
        }
    }

    fn table() -> RecurrentEventTable {
        let survey = ClosedSurvey {
            ordinal: 1,
            start: ts(0),
            end: ts(5),
            closure_reason: ClosureReason::CensoredByTertiary,
            intervals: vec![
                Interval {
                    start: ts(0),
                    stop: ts(2),
                    event: true,
                },
                Interval {
                    start: ts(2),
                    stop: ts(5),
                    event: false,
                },
            ],
            degenerate_cap: false,
        };
        Assembler::default().assemble(vec![SiteScan {
            site_id: SiteId::new("S1").unwrap(),
            surveys: vec![survey],
            counts: ScanCounts::default(),
        }])
    }

    #[test]
    fn assembled_table_passes() {
        assert_eq!(table().verify(&params()), Ok(()));
    }

    #[test]
    fn detects_gaps_between_records() {
        let mut table = table();
        table.records[1].start_at = ts(3);
        let err = table.verify(&params()).unwrap_err();
        assert_eq!(err.rule, "gap between enum 1 and 2");
    }

    #[test]
    fn detects_shifted_relative_times() {
        let mut offset = table();
        offset.records[0].t_start = 0.5;
        let err = offset.verify(&params()).unwrap_err();
        assert_eq!(err.rule, "first record does not start at 0");

        let mut gapped = table();
        gapped.records[1].t_start = 2.5;
        let err = gapped.verify(&params()).unwrap_err();
        assert_eq!(err.rule, "gap between enum 1 and 2");
    }

    #[test]
    fn detects_inconsistent_status() {
        let mut table = table();
        table.records[0].status = 0;
        let err = table.verify(&params()).unwrap_err();
        assert_eq!(err.rule, "status differs between records");
    }

    #[test]
    fn detects_missing_terminal_record() {
        let mut table = table();
        table.records[1].event = 1;
        let err = table.verify(&params()).unwrap_err();
        assert_eq!(err.to_string(), "survey S1-1: survey must end with exactly one censoring record");
    }

    #[test]
    fn detects_overlong_survey() {
        let short = RunParameters {
            survey_duration: Duration::days(4),
            ..params()
        };
        let err = table().verify(&short).unwrap_err();
        assert_eq!(err.rule, "survey exceeds the duration cap");
    }

    #[test]
    fn detects_duplicate_survey_ids() {
        let mut table = table();
        let copy = table.surveys[0].clone();
        table.surveys.push(copy);
        let err = table.verify(&params()).unwrap_err();
        assert_eq!(err.rule, "survey id is not unique");
    }
}
