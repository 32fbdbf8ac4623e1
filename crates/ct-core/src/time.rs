//! Timestamp parsing and fractional-day arithmetic.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use serde_json::Value;

/// Milliseconds in one day, the unit of output interval bounds.
pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Naive formats accepted for timestamp strings, read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a detection timestamp from a table cell.
///
/// Supports:
/// - RFC 3339: "2024-05-01T06:30:00Z", "2024-05-01T08:30:00+02:00"
/// - Naive date-time (UTC): "2024-05-01 06:30:00", "2024-05-01T06:30:00.250"
/// - Date only (midnight UTC): "2024-05-01"
/// - Number: fractional days since the Unix epoch
///
/// Instants are held at millisecond resolution: fractional seconds in
/// strings beyond the millisecond and sub-millisecond fractions of a
/// numeric day are rounded to the nearest millisecond.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n.as_f64().and_then(instant_from_days),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).round_subsecs(3));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().round_subsecs(3));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Converts fractional days since the Unix epoch to an instant.
pub fn instant_from_days(days: f64) -> Option<DateTime<Utc>> {
    duration_from_days(days).and_then(|d| DateTime::UNIX_EPOCH.checked_add_signed(d))
}

/// Converts fractional days to a duration at millisecond resolution.
///
/// Returns `None` for NaN, infinities and values outside chrono's range.
#[allow(clippy::cast_possible_truncation)]
pub fn duration_from_days(days: f64) -> Option<Duration> {
    let ms = (days * MS_PER_DAY).round();
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(ms as i64)
}

/// Length of `to - from` in fractional days.
#[allow(clippy::cast_precision_loss)]
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s)
            .single()
            .expect("valid test timestamp")
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let parsed = parse_timestamp(&json!("2024-05-01T08:30:00+02:00"));
        assert_eq!(parsed, Some(utc(2024, 5, 1, 6, 30, 0)));
    }

    #[test]
    fn parses_naive_formats_as_utc() {
        assert_eq!(
            parse_timestamp(&json!("2024-05-01 06:30:00")),
            Some(utc(2024, 5, 1, 6, 30, 0))
        );
        assert_eq!(
            parse_timestamp(&json!("2024-05-01T06:30:00")),
            Some(utc(2024, 5, 1, 6, 30, 0))
        );
        assert_eq!(
            parse_timestamp(&json!("2024-05-01")),
            Some(utc(2024, 5, 1, 0, 0, 0))
        );
    }

    #[test]
    fn parses_fractional_days() {
        assert_eq!(
            parse_timestamp(&json!(1.5)),
            Some(utc(1970, 1, 2, 12, 0, 0))
        );
        assert_eq!(parse_timestamp(&json!(0)), Some(DateTime::UNIX_EPOCH));
    }

    #[test]
    fn rounds_to_the_millisecond() {
        let quarter_ms = 0.25 / MS_PER_DAY;
        assert_eq!(parse_timestamp(&json!(quarter_ms)), Some(DateTime::UNIX_EPOCH));
        assert_eq!(
            parse_timestamp(&json!(3.0 * quarter_ms)),
            Some(DateTime::UNIX_EPOCH + Duration::milliseconds(1))
        );
        assert_eq!(
            parse_timestamp(&json!("1970-01-01T00:00:00.0004Z")),
            Some(DateTime::UNIX_EPOCH)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
        assert_eq!(parse_timestamp(&json!(null)), None);
        assert_eq!(parse_timestamp(&json!(1e300)), None);
    }

    #[test]
    fn days_between_is_fractional() {
        let start = utc(2024, 5, 1, 0, 0, 0);
        let end = utc(2024, 5, 2, 6, 0, 0);
        assert!((days_between(start, end) - 1.25).abs() < f64::EPSILON);
        assert_eq!(duration_from_days(0.5), Some(Duration::hours(12)));
        assert_eq!(duration_from_days(f64::NAN), None);
    }
}
