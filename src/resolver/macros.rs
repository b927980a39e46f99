//! Query-text macro expansion.
//!
//! The scanner reads the whole identifier after every `$` and looks it up
//! in a fixed table, so `$__interval` can never match the front of
//! `$__interval_ms` and `$__range` never eats into `$__rate_interval`.
//! Unknown names are copied through untouched.

use std::collections::BTreeMap;
use std::time::Duration;

use super::duration::{format_exact_duration, format_prometheus_duration};
use super::time::TimeRange;
use crate::error::{QueryError, Result};

const SYSTEM_MACROS: &[&str] = &[
    "__range",
    "__range_s",
    "__range_ms",
    "__interval",
    "__interval_ms",
    "__rate_interval",
    "__from",
    "__to",
    "__timeFrom",
    "__timeTo",
];

const FUNCTION_MACROS: &[&str] = &["__timeFilter"];

pub const DEFAULT_MAX_DATA_POINTS: u32 = 100;
pub const DEFAULT_RATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct MacroContext {
    range: TimeRange,
    interval: Duration,
    rate_interval: Duration,
    variables: BTreeMap<String, String>,
}

impl MacroContext {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            interval: interval_for(range, DEFAULT_MAX_DATA_POINTS),
            rate_interval: DEFAULT_RATE_INTERVAL,
            variables: BTreeMap::new(),
        }
    }

    pub fn with_max_data_points(mut self, max_data_points: u32) -> Self {
        self.interval = interval_for(self.range, max_data_points);
        self
    }

    pub fn with_rate_interval(mut self, rate_interval: Duration) -> Self {
        self.rate_interval = rate_interval;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.variables
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn system_value(&self, name: &str) -> Option<String> {
        let value = match name {
            "__range" => format_prometheus_duration(self.range.span()),
            "__range_s" => self.range.span().as_secs().to_string(),
            "__range_ms" => self.range.span().as_millis().to_string(),
            "__interval" => format_prometheus_duration(self.interval),
            "__interval_ms" => self.interval.as_millis().to_string(),
            "__rate_interval" => format_exact_duration(self.rate_interval),
            "__from" | "__timeFrom" => self.range.from_ms().to_string(),
            "__to" | "__timeTo" => self.range.to_ms().to_string(),
            _ => return None,
        };
        Some(value)
    }

    fn function_value(&self, name: &str, args: &str) -> Option<String> {
        match name {
            "__timeFilter" => {
                let column = args.trim();
                Some(format!(
                    "{col} >= fromUnixTimestamp64Milli({from}) AND {col} <= fromUnixTimestamp64Milli({to})",
                    col = column,
                    from = self.range.from_ms(),
                    to = self.range.to_ms()
                ))
            }
            _ => None,
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if name.starts_with("__") {
            self.system_value(name)
        } else {
            self.variables.get(name).cloned()
        }
    }

    /// Expands every known macro and template variable in `query`.
    ///
    /// Substituted values are emitted literally and never rescanned, so
    /// running the result through again changes nothing.
    pub fn substitute(&self, query: &str) -> Result<String> {
        let mut out = String::with_capacity(query.len());
        let mut rest = query;

        while let Some(pos) = rest.find(|c: char| c == '$' || c == '[') {
            out.push_str(&rest[..pos]);
            let token = &rest[pos..];

            let consumed = if token.starts_with('$') {
                self.expand_dollar(token, query, &mut out)?
            } else {
                self.expand_brackets(token, &mut out)
            };
            rest = &token[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Handles a token beginning with `$`. Returns the number of bytes
    /// consumed from `token`.
    fn expand_dollar(&self, token: &str, whole: &str, out: &mut String) -> Result<usize> {
        let after = &token[1..];

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(close) = braced.find('}') {
                let inner = &braced[..close];
                let name = inner.split_once(':').map(|(n, _)| n).unwrap_or(inner);
                if is_identifier(name) {
                    if let Some(value) = self.lookup(name) {
                        out.push_str(&value);
                        return Ok(2 + close + 1);
                    }
                }
            }
            out.push('$');
            return Ok(1);
        }

        let ident_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let ident = &after[..ident_len];
        if ident.is_empty() {
            out.push('$');
            return Ok(1);
        }

        if FUNCTION_MACROS.contains(&ident) {
            let call = &after[ident_len..];
            let args = call
                .strip_prefix('(')
                .and_then(|inner| inner.find(')').map(|close| &inner[..close]))
                .ok_or_else(|| QueryError::parse(whole, format!("${} requires a (column) argument", ident)))?;
            if let Some(value) = self.function_value(ident, args) {
                out.push_str(&value);
                return Ok(1 + ident_len + 1 + args.len() + 1);
            }
        }

        let known = if ident.starts_with("__") {
            SYSTEM_MACROS.contains(&ident)
        } else {
            true
        };
        match self.lookup(ident).filter(|_| known) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('$');
                out.push_str(ident);
            }
        }
        Ok(1 + ident_len)
    }

    fn expand_brackets(&self, token: &str, out: &mut String) -> usize {
        if let Some(inner) = token.strip_prefix("[[") {
            if let Some(close) = inner.find("]]") {
                let name = &inner[..close];
                if !name.starts_with("__") && is_identifier(name) {
                    if let Some(value) = self.variables.get(name) {
                        out.push_str(value);
                        return 2 + close + 2;
                    }
                }
            }
        }
        out.push('[');
        1
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Step between points when `range` is drawn with `max_data_points` points,
/// never below one second.
pub fn interval_for(range: TimeRange, max_data_points: u32) -> Duration {
    let points = max_data_points.max(1);
    (range.span() / points).max(MIN_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn hour_context() -> MacroContext {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap(),
        )
        .unwrap();
        MacroContext::new(range)
    }

    #[test]
    fn test_rate_interval_is_not_consumed_by_range() {
        let ctx = hour_context().with_rate_interval(Duration::from_secs(300));
        let out = ctx.substitute("rate(x[$__rate_interval]) / $__range").unwrap();
        assert_eq!(out, "rate(x[5m]) / 1h");
    }

    #[test]
    fn test_configured_rate_interval_is_rendered_exactly() {
        use crate::resolver::duration::parse_duration;

        for (raw, expected) in [
            ("90s", "rate(x[1m30s])"),
            ("2m30s", "rate(x[2m30s])"),
            ("500ms", "rate(x[500ms])"),
        ] {
            let ctx = hour_context().with_rate_interval(parse_duration(raw).unwrap());
            assert_eq!(ctx.substitute("rate(x[$__rate_interval])").unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn test_interval_ms_is_not_consumed_by_interval() {
        let ctx = hour_context();
        let out = ctx.substitute("$__interval_ms|$__interval|${__interval}").unwrap();
        assert_eq!(out, "36000|36s|36s");
    }

    #[test]
    fn test_range_variants_and_epoch_bounds() {
        let ctx = hour_context();
        let out = ctx
            .substitute("$__range_s $__range_ms $__from $__to $__timeFrom $__timeTo")
            .unwrap();
        assert_eq!(
            out,
            "3600 3600000 1705312800000 1705316400000 1705312800000 1705316400000"
        );
    }

    #[test]
    fn test_time_filter_function_macro() {
        let ctx = hour_context();
        let out = ctx
            .substitute("SELECT * FROM logs WHERE $__timeFilter(Timestamp) LIMIT 10")
            .unwrap();
        assert_eq!(
            out,
            "SELECT * FROM logs WHERE Timestamp >= fromUnixTimestamp64Milli(1705312800000) \
             AND Timestamp <= fromUnixTimestamp64Milli(1705316400000) LIMIT 10"
        );
    }

    #[test]
    fn test_time_filter_without_argument_is_parse_error() {
        let err = hour_context().substitute("WHERE $__timeFilter").unwrap_err();
        assert!(matches!(err, QueryError::Parse { .. }));
    }

    #[test]
    fn test_user_variables_in_all_forms() {
        let ctx = hour_context()
            .with_variable("job", "api")
            .with_variable("namespace", "prod");
        let out = ctx
            .substitute(r#"up{job="${job}", ns="$namespace", alt="[[job]]"}"#)
            .unwrap();
        assert_eq!(out, r#"up{job="api", ns="prod", alt="api"}"#);
    }

    #[test]
    fn test_variable_names_respect_word_boundaries() {
        let ctx = hour_context().with_variable("name", "X");
        assert_eq!(ctx.substitute("$name $namespace").unwrap(), "X $namespace");
    }

    #[test]
    fn test_unknown_macros_left_verbatim() {
        let ctx = hour_context();
        let query = "$__unknown ${missing} $ 5 [[nope]] x[5m] $__rangefoo";
        assert_eq!(ctx.substitute(query).unwrap(), query);
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let ctx = hour_context().with_variable("job", "api");
        let once = ctx
            .substitute("sum(rate(http_requests_total{job=\"$job\"}[$__rate_interval])) by (le) [$__range]")
            .unwrap();
        let twice = ctx.substitute(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_interval_floor_and_data_points() {
        let ctx = hour_context().with_max_data_points(10_000);
        assert_eq!(ctx.interval(), Duration::from_secs(1));
        let ctx = hour_context().with_max_data_points(60);
        assert_eq!(ctx.interval(), Duration::from_secs(60));
    }
}
