//! Duration grammar shared by relative time expressions and configuration
//! values, plus the compact duration rendering query languages expect.

use std::time::Duration;

use crate::error::{QueryError, Result};

/// A unit accepted after a quantity in `now-5m`, `1h30m` and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let unit = match suffix {
            "ns" => TimeUnit::Nanosecond,
            "us" | "µs" => TimeUnit::Microsecond,
            "ms" => TimeUnit::Millisecond,
            "s" => TimeUnit::Second,
            "m" => TimeUnit::Minute,
            "h" => TimeUnit::Hour,
            "d" => TimeUnit::Day,
            "w" => TimeUnit::Week,
            "M" => TimeUnit::Month,
            "y" => TimeUnit::Year,
            _ => return None,
        };
        Some(unit)
    }

    /// Length in nanoseconds for units with a fixed length. Months and years
    /// depend on the calendar position and return `None`.
    pub fn fixed_nanos(self) -> Option<u128> {
        const SEC: u128 = 1_000_000_000;
        match self {
            TimeUnit::Nanosecond => Some(1),
            TimeUnit::Microsecond => Some(1_000),
            TimeUnit::Millisecond => Some(1_000_000),
            TimeUnit::Second => Some(SEC),
            TimeUnit::Minute => Some(60 * SEC),
            TimeUnit::Hour => Some(3_600 * SEC),
            TimeUnit::Day => Some(86_400 * SEC),
            TimeUnit::Week => Some(7 * 86_400 * SEC),
            TimeUnit::Month | TimeUnit::Year => None,
        }
    }

    pub fn is_calendar(self) -> bool {
        self.fixed_nanos().is_none()
    }
}

/// One `<quantity><unit>` term of an offset such as `2h45m`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetTerm {
    pub quantity: f64,
    pub unit: TimeUnit,
}

/// Splits `2h45m`, `1.5h` or `3M` into terms. `whole` is the full user input
/// and is only used for error reporting.
pub(crate) fn parse_terms(body: &str, whole: &str) -> Result<Vec<OffsetTerm>> {
    if body.is_empty() {
        return Err(QueryError::parse(whole, "missing quantity"));
    }

    let mut terms = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let number_len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(QueryError::parse(whole, "missing quantity"));
        }
        let (number, after) = rest.split_at(number_len);
        let quantity: f64 = number
            .parse()
            .map_err(|_| QueryError::parse(whole, format!("invalid quantity {:?}", number)))?;

        let unit_len = after
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(i, _)| i)
            .unwrap_or(after.len());
        let (suffix, remaining) = after.split_at(unit_len);
        if suffix.is_empty() {
            return Err(QueryError::parse(whole, format!("missing unit after {}", number)));
        }
        let unit = TimeUnit::from_suffix(suffix)
            .ok_or_else(|| QueryError::parse(whole, format!("unknown unit {:?}", suffix)))?;

        if unit.is_calendar() && quantity.fract() != 0.0 {
            return Err(QueryError::parse(
                whole,
                format!("fractional quantity not allowed for unit {:?}", suffix),
            ));
        }

        terms.push(OffsetTerm { quantity, unit });
        rest = remaining;
    }
    Ok(terms)
}

/// Parses a fixed-length duration such as `5m`, `1h30m` or `250ms`.
/// Calendar units are rejected because their length is not fixed.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let mut total: u128 = 0;
    for term in parse_terms(trimmed, input)? {
        let nanos = term.unit.fixed_nanos().ok_or_else(|| {
            QueryError::parse(input, "months and years have no fixed duration")
        })?;
        total += (term.quantity * nanos as f64).round() as u128;
    }
    Ok(Duration::from_nanos(total.min(u64::MAX as u128) as u64))
}

/// Renders a duration the way PromQL range selectors expect it: `36s`,
/// `14m`, `2h`, `1h30m`. Sub-unit remainders are truncated.
pub fn format_prometheus_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{}s", secs);
    }
    if secs < 3_600 {
        return format!("{}m", secs / 60);
    }
    let hours = secs / 3_600;
    let minutes = (secs / 60) % 60;
    if minutes == 0 {
        format!("{}h", hours)
    } else {
        format!("{}h{}m", hours, minutes)
    }
}

/// Renders a duration with every non-zero component down to milliseconds:
/// `1m30s`, `2m30s`, `500ms`. Used where the exact value matters, such as a
/// user-configured rate interval.
pub fn format_exact_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    let mut rest = total_ms;
    for (unit_ms, suffix) in [(3_600_000, "h"), (60_000, "m"), (1_000, "s"), (1, "ms")] {
        let count = rest / unit_ms;
        if count > 0 {
            out.push_str(&count.to_string());
            out.push_str(suffix);
            rest %= unit_ms;
        }
    }
    out
}
