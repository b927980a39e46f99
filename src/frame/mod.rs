pub mod decode;

use std::collections::BTreeMap;

use serde_json::Value;

pub use decode::{decode_response, decode_wire_response, proxy_error_message, QueryEnvelope, REF_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Time,
    Number,
    String,
    Other,
}

impl FieldRole {
    pub fn from_type_tag(tag: Option<&str>) -> Self {
        match tag.map(str::to_ascii_lowercase).as_deref() {
            Some("time") => FieldRole::Time,
            Some("number") => FieldRole::Number,
            Some("string") => FieldRole::String,
            _ => FieldRole::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub role: FieldRole,
    pub labels: BTreeMap<String, String>,
    pub display_name: Option<String>,
}

/// Cells of one field. `None` marks a cell that was null or not encoded
/// the way the field's type promises.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Time(Vec<Option<i64>>),
    Number(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Other(Vec<Value>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Time(v) => v.len(),
            Column::Number(v) => v.len(),
            Column::Text(v) => v.len(),
            Column::Other(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell `row` as JSON, or `None` when missing. Non-finite numbers come
    /// back as the strings `NaN`, `+Inf` and `-Inf`.
    pub fn json_at(&self, row: usize) -> Option<Value> {
        match self {
            Column::Time(v) => v.get(row).copied().flatten().map(Value::from),
            Column::Number(v) => v.get(row).copied().flatten().map(number_to_json),
            Column::Text(v) => v.get(row).cloned().flatten().map(Value::String),
            Column::Other(v) => v.get(row).filter(|c| !c.is_null()).cloned(),
        }
    }
}

fn number_to_json(n: f64) -> Value {
    if n.is_nan() {
        Value::String("NaN".to_string())
    } else if n.is_infinite() {
        Value::String(if n > 0.0 { "+Inf" } else { "-Inf" }.to_string())
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub ref_id: String,
    pub fields: Vec<FieldDescriptor>,
    pub columns: Vec<Column>,
    row_count: usize,
}

impl Frame {
    /// Builds a frame, deriving the row count. A frame whose columns disagree
    /// in length, or which lacks a column for some field, has zero rows.
    pub fn new(name: String, ref_id: String, fields: Vec<FieldDescriptor>, columns: Vec<Column>) -> Self {
        let nominal = columns.iter().map(Column::len).max().unwrap_or(0);
        let consistent = columns.len() == fields.len() && columns.iter().all(|c| c.len() == nominal);
        Self {
            name,
            ref_id,
            fields,
            columns,
            row_count: if consistent { nominal } else { 0 },
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Frame name, falling back to the first field-level display name.
    pub fn display_name(&self) -> Option<&str> {
        if !self.name.is_empty() {
            return Some(&self.name);
        }
        self.fields
            .iter()
            .find_map(|f| f.display_name.as_deref().filter(|n| !n.is_empty()))
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .and_then(|i| self.columns.get(i))
    }

    /// Every present value of the named column, in row order.
    pub fn column_values(&self, name: &str) -> Vec<Value> {
        match self.column(name) {
            Some(col) => (0..self.row_count).filter_map(|row| col.json_at(row)).collect(),
            None => Vec::new(),
        }
    }

    /// Ordered (epoch-ms, value) pairs of the canonical time/value columns.
    /// Missing values become NaN; rows without a timestamp are skipped.
    pub fn time_value_pairs(&self) -> Vec<(i64, f64)> {
        let Some((time_idx, value_idx)) = classify_series_fields(&self.fields) else {
            return Vec::new();
        };
        let (Some(Column::Time(times)), Some(Column::Number(values))) =
            (self.columns.get(time_idx), self.columns.get(value_idx))
        else {
            return Vec::new();
        };

        times
            .iter()
            .zip(values.iter())
            .take(self.row_count)
            .filter_map(|(t, v)| t.map(|t| (t, v.unwrap_or(f64::NAN))))
            .collect()
    }

    pub fn value_labels(&self) -> BTreeMap<String, String> {
        classify_series_fields(&self.fields)
            .and_then(|(_, value_idx)| self.fields.get(value_idx))
            .map(|f| f.labels.clone())
            .unwrap_or_default()
    }
}

/// Picks the time and value columns of a time-series frame: the first
/// time-role field and the last number-role field. Frames from
/// multi-value queries carry several number fields and the trailing one is
/// the series value.
pub fn classify_series_fields(fields: &[FieldDescriptor]) -> Option<(usize, usize)> {
    let time = fields.iter().position(|f| f.role == FieldRole::Time)?;
    let value = fields.iter().rposition(|f| f.role == FieldRole::Number)?;
    Some((time, value))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn field(name: &str, role: FieldRole) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            role,
            labels: BTreeMap::new(),
            display_name: None,
        }
    }

    pub(crate) fn series_frame(name: &str, times: &[i64], values: &[Option<f64>]) -> Frame {
        Frame::new(
            name.to_string(),
            REF_ID.to_string(),
            vec![field("Time", FieldRole::Time), field("Value", FieldRole::Number)],
            vec![
                Column::Time(times.iter().map(|t| Some(*t)).collect()),
                Column::Number(values.to_vec()),
            ],
        )
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(FieldRole::from_type_tag(Some("time")), FieldRole::Time);
        assert_eq!(FieldRole::from_type_tag(Some("number")), FieldRole::Number);
        assert_eq!(FieldRole::from_type_tag(Some("string")), FieldRole::String);
        assert_eq!(FieldRole::from_type_tag(Some("boolean")), FieldRole::Other);
        assert_eq!(FieldRole::from_type_tag(None), FieldRole::Other);
    }

    #[test]
    fn test_last_number_field_is_value() {
        let fields = vec![
            field("Time", FieldRole::Time),
            field("min", FieldRole::Number),
            field("host", FieldRole::String),
            field("max", FieldRole::Number),
        ];
        assert_eq!(classify_series_fields(&fields), Some((0, 3)));
        assert_eq!(classify_series_fields(&fields[1..]), None);
    }

    #[test]
    fn test_pairs_in_order_with_missing_as_nan() {
        let frame = series_frame("up", &[1000, 2000, 3000], &[Some(1.0), None, Some(3.0)]);
        let pairs = frame.time_value_pairs();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0], (1000, 1.0));
        assert!(pairs[1].1.is_nan());
        assert_eq!(pairs[2], (3000, 3.0));
    }

    #[test]
    fn test_ragged_frame_has_no_rows() {
        let frame = series_frame("up", &[1000, 2000, 3000], &[Some(1.0)]);
        assert_eq!(frame.row_count(), 0);
        assert!(frame.time_value_pairs().is_empty());
    }

    #[test]
    fn test_frame_without_number_field_has_no_pairs() {
        let frame = Frame::new(
            String::new(),
            REF_ID.to_string(),
            vec![field("Time", FieldRole::Time), field("Line", FieldRole::String)],
            vec![
                Column::Time(vec![Some(1)]),
                Column::Text(vec![Some("hello".to_string())]),
            ],
        );
        assert_eq!(frame.row_count(), 1);
        assert!(frame.time_value_pairs().is_empty());
    }

    #[test]
    fn test_json_cells_and_column_values() {
        let frame = Frame::new(
            "t".to_string(),
            REF_ID.to_string(),
            vec![field("v", FieldRole::Number)],
            vec![Column::Number(vec![Some(1.5), None, Some(f64::NAN), Some(f64::NEG_INFINITY)])],
        );
        assert_eq!(
            frame.column_values("v"),
            vec![
                serde_json::json!(1.5),
                serde_json::json!("NaN"),
                serde_json::json!("-Inf")
            ]
        );
        assert!(frame.column_values("missing").is_empty());
    }
}
