use chrono::{SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

use super::series::series_labels;
use super::{serialize_value, Labels, LogMode};
use crate::frame::{Column, FieldRole, Frame};

const LINE_FIELD_NAMES: &[&str] = &["line", "body", "message", "msg", "log"];
const NANOS_FIELD: &str = "tsns";
const LABELS_FIELD: &str = "labels";
const BOOKKEEPING_FIELDS: &[&str] = &["tsns", "id", "labeltypes"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValue {
    pub timestamp: String,
    #[serde(serialize_with = "serialize_value")]
    pub value: f64,
}

/// One log line, or one series when the log store answered a metric query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    pub labels: Labels,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_optional_value")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<MetricValue>,
}

impl LogEntry {
    pub fn is_metric(&self) -> bool {
        self.line.is_none()
    }

    pub(crate) fn metric_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.value.into_iter().chain(self.values.iter().map(|v| v.value))
    }
}

fn serialize_optional_value<S: serde::Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serialize_value(v, serializer),
        None => serializer.serialize_none(),
    }
}

pub fn format_timestamp_ms(ms: i64) -> String {
    format_timestamp_ns(i128::from(ms) * 1_000_000)
}

/// RFC3339 with as many fractional digits as needed.
pub fn format_timestamp_ns(ns: i128) -> String {
    let nanos = ns.rem_euclid(1_000_000_000) as u32;
    let parsed = i64::try_from(ns.div_euclid(1_000_000_000))
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, nanos).single());
    match parsed {
        Some(t) => t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => ns.to_string(),
    }
}

fn find_field(frame: &Frame, names: &[&str], role: FieldRole) -> Option<usize> {
    frame
        .fields
        .iter()
        .position(|f| f.role == role && names.contains(&f.name.to_ascii_lowercase().as_str()))
}

fn line_field(frame: &Frame) -> Option<usize> {
    find_field(frame, LINE_FIELD_NAMES, FieldRole::String).or_else(|| {
        if frame.fields.iter().any(|f| f.role == FieldRole::Number) {
            return None;
        }
        frame.fields.iter().position(|f| {
            f.role == FieldRole::String && !BOOKKEEPING_FIELDS.contains(&f.name.to_ascii_lowercase().as_str())
        })
    })
}

pub(crate) fn log_stream(frames: &[Frame], mode: LogMode) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    for frame in frames {
        match line_field(frame) {
            Some(line_idx) => push_lines(frame, line_idx, &mut entries),
            None => push_metric(frame, mode, &mut entries),
        }
    }
    entries
}

fn push_lines(frame: &Frame, line_idx: usize, entries: &mut Vec<LogEntry>) {
    let Some(Column::Text(lines)) = frame.columns.get(line_idx) else {
        return;
    };
    let times = frame
        .fields
        .iter()
        .position(|f| f.role == FieldRole::Time)
        .and_then(|i| frame.columns.get(i));
    let nanos = frame
        .fields
        .iter()
        .position(|f| f.name.eq_ignore_ascii_case(NANOS_FIELD))
        .and_then(|i| frame.columns.get(i));
    let row_labels = frame
        .fields
        .iter()
        .position(|f| f.name.eq_ignore_ascii_case(LABELS_FIELD) && f.role == FieldRole::Other)
        .and_then(|i| frame.columns.get(i));

    let base_labels = frame.fields[line_idx].labels.clone();

    for row in 0..frame.row_count() {
        let Some(line) = lines.get(row).cloned().flatten() else {
            continue;
        };
        let Some(timestamp) = row_timestamp(times, nanos, row) else {
            continue;
        };

        let mut labels = base_labels.clone();
        if let Some(Column::Other(cells)) = row_labels {
            if let Some(Value::Object(map)) = cells.get(row) {
                for (k, v) in map {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    labels.insert(k.clone(), v);
                }
            }
        }

        entries.push(LogEntry {
            timestamp: Some(timestamp),
            line: Some(line),
            labels,
            value: None,
            values: Vec::new(),
        });
    }
}

fn row_timestamp(times: Option<&Column>, nanos: Option<&Column>, row: usize) -> Option<String> {
    if let Some(Column::Text(ns)) = nanos {
        if let Some(ns) = ns.get(row).and_then(|s| s.as_deref()).and_then(|s| s.parse::<i128>().ok()) {
            return Some(format_timestamp_ns(ns));
        }
    }
    match times {
        Some(Column::Time(ms)) => ms.get(row).copied().flatten().map(format_timestamp_ms),
        _ => None,
    }
}

fn push_metric(frame: &Frame, mode: LogMode, entries: &mut Vec<LogEntry>) {
    let pairs = frame.time_value_pairs();
    if pairs.is_empty() {
        return;
    }
    let labels = series_labels(frame);

    let entry = match mode {
        LogMode::Instant => {
            let Some(&(ts, value)) = pairs.last() else {
                return;
            };
            LogEntry {
                timestamp: Some(format_timestamp_ms(ts)),
                line: None,
                labels,
                value: Some(value),
                values: Vec::new(),
            }
        }
        LogMode::Range => LogEntry {
            timestamp: None,
            line: None,
            labels,
            value: None,
            values: pairs
                .into_iter()
                .map(|(ts, value)| MetricValue {
                    timestamp: format_timestamp_ms(ts),
                    value,
                })
                .collect(),
        },
    };
    entries.push(entry);
}
