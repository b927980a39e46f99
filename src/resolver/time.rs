use std::time::Duration;

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Months, NaiveDate, NaiveDateTime,
    SecondsFormat, TimeZone, Timelike, Utc,
};
use serde::Serialize;

use super::duration::{parse_terms, OffsetTerm, TimeUnit};
use crate::error::{QueryError, Result};

/// Window used when one or both bounds are omitted.
pub const DEFAULT_SPAN: Duration = Duration::from_secs(3_600);

/// Which side of a window an expression describes. Bare dates and `/unit`
/// rounding snap to the start of the period for `Start` and to its last
/// millisecond for `End`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from > to {
            return Err(QueryError::InvalidArgument(format!(
                "start time {} is after end time {}",
                from.to_rfc3339(),
                to.to_rfc3339()
            )));
        }
        Ok(Self { from, to })
    }

    pub fn span(&self) -> Duration {
        (self.to - self.from).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn from_ms(&self) -> i64 {
        self.from.timestamp_millis()
    }

    pub fn to_ms(&self) -> i64 {
        self.to.timestamp_millis()
    }

    /// `2024-01-15T10:00:00Z to 2024-01-15T11:00:00Z`
    pub fn describe(&self) -> String {
        format!(
            "{} to {}",
            self.from.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.to.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

pub fn parse_start_time(input: &str) -> Result<Option<DateTime<Utc>>> {
    parse_time_at(input, Utc::now(), Bound::Start)
}

pub fn parse_end_time(input: &str) -> Result<Option<DateTime<Utc>>> {
    parse_time_at(input, Utc::now(), Bound::End)
}

/// Resolves a user-supplied start/end pair against the current time.
///
/// Both empty gives the last hour. A single given bound is extended by one
/// hour in the open direction.
pub fn resolve_time_range(start: &str, end: &str) -> Result<TimeRange> {
    resolve_time_range_at(start, end, Utc::now(), DEFAULT_SPAN)
}

pub fn resolve_time_range_at(
    start: &str,
    end: &str,
    now: DateTime<Utc>,
    default_span: Duration,
) -> Result<TimeRange> {
    let span = ChronoDuration::from_std(default_span)
        .map_err(|_| QueryError::InvalidArgument("default span out of range".to_string()))?;

    let from = parse_time_at(start, now, Bound::Start)?;
    let to = parse_time_at(end, now, Bound::End)?;

    let (from, to) = match (from, to) {
        (Some(from), Some(to)) => (from, to),
        (Some(from), None) => (from, from + span),
        (None, Some(to)) => (to - span, to),
        (None, None) => (now - span, now),
    };
    TimeRange::new(from, to)
}

/// Parses one time expression relative to `now`. Empty input means the
/// bound was not given.
pub fn parse_time_at(input: &str, now: DateTime<Utc>, bound: Bound) -> Result<Option<DateTime<Utc>>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if let Some(rest) = trimmed.strip_prefix("now") {
        return parse_relative(rest, input, now, bound).map(Some);
    }

    if let Some(ts) = parse_unix_millis(trimmed) {
        return Utc
            .timestamp_millis_opt(ts)
            .single()
            .map(Some)
            .ok_or_else(|| QueryError::parse(input, "unix timestamp out of range"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Some(Utc.from_utc_datetime(&naive)));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let start = at(date, 0, 0).ok_or_else(|| QueryError::parse(input, "invalid date"))?;
        return match bound {
            Bound::Start => Ok(Some(start)),
            Bound::End => Ok(Some(start + ChronoDuration::days(1) - ChronoDuration::milliseconds(1))),
        };
    }

    Err(QueryError::parse(input, "unrecognized time expression"))
}

fn parse_unix_millis(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_relative(rest: &str, whole: &str, now: DateTime<Utc>, bound: Bound) -> Result<DateTime<Utc>> {
    let (offset, rounding) = match rest.split_once('/') {
        Some((offset, unit)) => (offset, Some(unit)),
        None => (rest, None),
    };

    let mut t = now;
    if !offset.is_empty() {
        let (sign, body) = if let Some(body) = offset.strip_prefix('-') {
            (-1, body)
        } else if let Some(body) = offset.strip_prefix('+') {
            (1, body)
        } else {
            return Err(QueryError::parse(whole, "expected + or - after now"));
        };
        for term in parse_terms(body, whole)? {
            t = apply_term(t, term, sign, whole)?;
        }
    }

    match rounding {
        None => Ok(t),
        Some(suffix) => {
            let unit = TimeUnit::from_suffix(suffix)
                .ok_or_else(|| QueryError::parse(whole, format!("unknown rounding unit {:?}", suffix)))?;
            round_to_unit(t, unit, bound, whole)
        }
    }
}

fn apply_term(t: DateTime<Utc>, term: OffsetTerm, sign: i64, whole: &str) -> Result<DateTime<Utc>> {
    let out_of_range = || QueryError::parse(whole, "offset out of range");

    match term.unit {
        TimeUnit::Month | TimeUnit::Year => {
            let per = if term.unit == TimeUnit::Year { 12.0 } else { 1.0 };
            let months = (term.quantity * per) as u32;
            let months = Months::new(months);
            if sign < 0 {
                t.checked_sub_months(months)
            } else {
                t.checked_add_months(months)
            }
            .ok_or_else(out_of_range)
        }
        unit => {
            let nanos = unit.fixed_nanos().ok_or_else(out_of_range)?;
            let total = (term.quantity * nanos as f64).round();
            if total > i64::MAX as f64 {
                return Err(out_of_range());
            }
            t.checked_add_signed(ChronoDuration::nanoseconds(sign * total as i64))
                .ok_or_else(out_of_range)
        }
    }
}

fn round_to_unit(t: DateTime<Utc>, unit: TimeUnit, bound: Bound, whole: &str) -> Result<DateTime<Utc>> {
    let invalid = || QueryError::parse(whole, "cannot round to unit");
    let date = t.date_naive();

    let floor = match unit {
        TimeUnit::Second => t.with_nanosecond(0).ok_or_else(invalid)?,
        TimeUnit::Minute => at(date, t.hour(), t.minute()).ok_or_else(invalid)?,
        TimeUnit::Hour => at(date, t.hour(), 0).ok_or_else(invalid)?,
        TimeUnit::Day => at(date, 0, 0).ok_or_else(invalid)?,
        TimeUnit::Week => {
            let back = ChronoDuration::days(i64::from(date.weekday().num_days_from_monday()));
            at(date - back, 0, 0).ok_or_else(invalid)?
        }
        TimeUnit::Month => {
            let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).ok_or_else(invalid)?;
            at(first, 0, 0).ok_or_else(invalid)?
        }
        TimeUnit::Year => {
            let first = NaiveDate::from_ymd_opt(date.year(), 1, 1).ok_or_else(invalid)?;
            at(first, 0, 0).ok_or_else(invalid)?
        }
        TimeUnit::Nanosecond | TimeUnit::Microsecond | TimeUnit::Millisecond => {
            return Err(QueryError::parse(whole, "rounding below one second is not supported"));
        }
    };

    if bound == Bound::Start {
        return Ok(floor);
    }

    let next = match unit {
        TimeUnit::Month => floor.checked_add_months(Months::new(1)),
        TimeUnit::Year => floor.checked_add_months(Months::new(12)),
        fixed => fixed
            .fixed_nanos()
            .and_then(|n| floor.checked_add_signed(ChronoDuration::nanoseconds(n as i64))),
    }
    .ok_or_else(invalid)?;
    Ok(next - ChronoDuration::milliseconds(1))
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour, minute, 0).map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 10, 30, 15).unwrap()
    }

    fn within(actual: DateTime<Utc>, expected: DateTime<Utc>, tolerance_secs: i64) -> bool {
        (actual - expected).num_seconds().abs() <= tolerance_secs
    }

    #[test]
    fn test_empty_input_is_unbounded() {
        assert_eq!(parse_start_time("").unwrap(), None);
        assert_eq!(parse_end_time("   ").unwrap(), None);
    }

    #[test]
    fn test_now_and_relative_offsets_against_clock() {
        let now = Utc::now();
        let cases = [
            ("now", now),
            ("now-5m", now - ChronoDuration::minutes(5)),
            ("now-1h", now - ChronoDuration::hours(1)),
            ("now-2d", now - ChronoDuration::days(2)),
            ("now-1w", now - ChronoDuration::weeks(1)),
            ("now+30s", now + ChronoDuration::seconds(30)),
            ("now-2h45m", now - ChronoDuration::minutes(165)),
            ("now-1.5h", now - ChronoDuration::minutes(90)),
        ];
        for (input, expected) in cases {
            let got = parse_start_time(input).unwrap().unwrap();
            assert!(within(got, expected, 2), "{input}: got {got}, expected {expected}");
        }
    }

    #[test]
    fn test_calendar_months_and_years() {
        let now = fixed_now();
        let month_ago = parse_time_at("now-1M", now, Bound::Start).unwrap().unwrap();
        // March 31 minus one month clamps to the end of February.
        assert_eq!(month_ago, Utc.with_ymd_and_hms(2024, 2, 29, 10, 30, 15).unwrap());

        let year_ago = parse_time_at("now-1y", now, Bound::Start).unwrap().unwrap();
        assert_eq!(year_ago, Utc.with_ymd_and_hms(2023, 3, 31, 10, 30, 15).unwrap());
    }

    #[test]
    fn test_rfc3339_and_naive_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        for input in ["2024-01-15T10:00:00Z", "2024-01-15T12:00:00+02:00", "2024-01-15T10:00:00", "2024-01-15 10:00:00"] {
            assert_eq!(parse_start_time(input).unwrap(), Some(expected), "{input}");
        }
    }

    #[test]
    fn test_bare_date_bounds() {
        let start = parse_start_time("2024-01-15").unwrap().unwrap();
        let end = parse_end_time("2024-01-15").unwrap().unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 1, 15, 23, 59, 59).unwrap() + ChronoDuration::milliseconds(999));
    }

    #[test]
    fn test_unix_millis() {
        let got = parse_start_time("1705312800000").unwrap().unwrap();
        assert_eq!(got, Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_rounding_suffix() {
        let now = fixed_now();
        let day_start = parse_time_at("now/d", now, Bound::Start).unwrap().unwrap();
        let day_end = parse_time_at("now/d", now, Bound::End).unwrap().unwrap();
        assert_eq!(day_start, Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap());
        assert_eq!(day_end, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap() - ChronoDuration::milliseconds(1));

        // 2024-03-31 is a Sunday; weeks start on Monday.
        let week_start = parse_time_at("now/w", now, Bound::Start).unwrap().unwrap();
        assert_eq!(week_start, Utc.with_ymd_and_hms(2024, 3, 25, 0, 0, 0).unwrap());

        let prev_month = parse_time_at("now-1M/M", now, Bound::Start).unwrap().unwrap();
        assert_eq!(prev_month, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_malformed_inputs_fail_with_parse_error() {
        for input in ["yesterday", "now-", "now-5", "now-5x", "now*5m", "now-1.5M", "now-1.5y", "2024-13-45", "now/q", "12:00"] {
            match parse_start_time(input) {
                Err(QueryError::Parse { input: reported, .. }) => assert_eq!(reported, input),
                other => panic!("{input}: expected parse error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_default_window_rules() {
        let now = fixed_now();
        let hour = ChronoDuration::hours(1);

        let both = resolve_time_range_at("", "", now, DEFAULT_SPAN).unwrap();
        assert_eq!((both.from, both.to), (now - hour, now));

        let start_only = resolve_time_range_at("now-3h", "", now, DEFAULT_SPAN).unwrap();
        assert_eq!(start_only.from, now - ChronoDuration::hours(3));
        assert_eq!(start_only.to, now - ChronoDuration::hours(2));

        let end_only = resolve_time_range_at("", "now-3h", now, DEFAULT_SPAN).unwrap();
        assert_eq!(end_only.from, now - ChronoDuration::hours(4));
        assert_eq!(end_only.to, now - ChronoDuration::hours(3));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = resolve_time_range_at("now", "now-1h", fixed_now(), DEFAULT_SPAN).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn test_describe_window() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(range.describe(), "2024-01-15T10:00:00Z to 2024-01-15T11:00:00Z");
        assert_eq!(range.span(), Duration::from_secs(3_600));
    }
}
