//! Turns decoded frames into the result shape a query asked for.

pub mod logs;
pub mod series;
pub mod table;

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::frame::Frame;

pub use logs::{format_timestamp_ms, format_timestamp_ns, LogEntry, MetricValue};
pub use series::{series_labels, InstantSample, MetricSeries, SamplePoint, NAME_LABEL};
pub use table::TableFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    #[default]
    Range,
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    Instant,
    Range,
    Table,
    Log(LogMode),
}

impl QueryShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryShape::Instant => "instant",
            QueryShape::Range => "range",
            QueryShape::Table => "table",
            QueryShape::Log(LogMode::Range) => "log",
            QueryShape::Log(LogMode::Instant) => "log_instant",
        }
    }

    pub fn is_instant(&self) -> bool {
        matches!(self, QueryShape::Instant | QueryShape::Log(LogMode::Instant))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "resultType", content = "result", rename_all = "camelCase")]
pub enum MaterializedResult {
    InstantVector(Vec<InstantSample>),
    RangeMatrix(Vec<MetricSeries>),
    Table(Vec<TableFrame>),
    LogStream(Vec<LogEntry>),
}

/// How a result relates to "no data".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emptiness {
    HasData,
    /// No series, rows or lines at all.
    NoData,
    /// Samples exist but every one of them is NaN.
    AllNaN,
}

impl MaterializedResult {
    pub fn len(&self) -> usize {
        match self {
            MaterializedResult::InstantVector(v) => v.len(),
            MaterializedResult::RangeMatrix(m) => m.len(),
            MaterializedResult::Table(frames) => frames.iter().map(|f| f.rows.len()).sum(),
            MaterializedResult::LogStream(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.emptiness() != Emptiness::HasData
    }

    pub fn emptiness(&self) -> Emptiness {
        let values: Box<dyn Iterator<Item = f64> + '_> = match self {
            MaterializedResult::InstantVector(v) => Box::new(v.iter().map(|s| s.value)),
            MaterializedResult::RangeMatrix(m) => {
                Box::new(m.iter().flat_map(|s| s.samples.iter().map(|p| p.value)))
            }
            MaterializedResult::LogStream(entries) if entries.iter().all(LogEntry::is_metric) => {
                Box::new(entries.iter().flat_map(|e| e.metric_values()))
            }
            other => {
                return if other.len() == 0 {
                    Emptiness::NoData
                } else {
                    Emptiness::HasData
                };
            }
        };

        let mut seen = false;
        for value in values {
            if !value.is_nan() {
                return Emptiness::HasData;
            }
            seen = true;
        }
        if seen {
            Emptiness::AllNaN
        } else {
            Emptiness::NoData
        }
    }
}

pub fn materialize(frames: &[Frame], shape: QueryShape) -> MaterializedResult {
    match shape {
        QueryShape::Instant => MaterializedResult::InstantVector(series::instant_vector(frames)),
        QueryShape::Range => MaterializedResult::RangeMatrix(series::range_matrix(frames)),
        QueryShape::Table => MaterializedResult::Table(table::table_frames(frames)),
        QueryShape::Log(mode) => MaterializedResult::LogStream(logs::log_stream(frames, mode)),
    }
}

/// Numbers as JSON numbers, non-finite values as Prometheus-style strings.
pub(crate) fn serialize_value<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_infinite() {
        serializer.serialize_str(if *value > 0.0 { "+Inf" } else { "-Inf" })
    } else {
        serializer.serialize_f64(*value)
    }
}

pub(crate) type Labels = BTreeMap<String, String>;
