use serde::Serialize;
use serde_json::{Map, Value};

use crate::frame::{FieldDescriptor, Frame};

/// Flux stores every field under a generic `_value` column and names the
/// real field in a `_field` label.
const GENERIC_VALUE_COLUMN: &str = "_value";
const FIELD_LABEL: &str = "_field";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableFrame {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
}

fn column_name(field: &FieldDescriptor) -> String {
    if field.name == GENERIC_VALUE_COLUMN {
        if let Some(alias) = field.labels.get(FIELD_LABEL).filter(|a| !a.is_empty()) {
            return alias.clone();
        }
    }
    field.name.clone()
}

pub(crate) fn table_frames(frames: &[Frame]) -> Vec<TableFrame> {
    frames
        .iter()
        .filter(|frame| !frame.fields.is_empty())
        .map(|frame| {
            let columns: Vec<String> = frame.fields.iter().map(column_name).collect();
            let rows: Vec<Map<String, Value>> = (0..frame.row_count())
                .map(|row| {
                    columns
                        .iter()
                        .zip(frame.columns.iter())
                        .filter_map(|(name, column)| column.json_at(row).map(|cell| (name.clone(), cell)))
                        .collect()
                })
                .collect();
            TableFrame {
                name: frame.name.clone(),
                row_count: rows.len(),
                columns,
                rows,
            }
        })
        .collect()
}
