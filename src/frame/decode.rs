use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{Column, FieldDescriptor, FieldRole, Frame};
use crate::dispatch::WireResponse;
use crate::error::{QueryError, Result};

/// Every query is issued as a single target under this ref ID.
pub const REF_ID: &str = "A";

#[derive(Debug, Default, Deserialize)]
pub struct QueryEnvelope {
    #[serde(default)]
    pub results: HashMap<String, RefResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefResult {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub frames: Vec<RawFrame>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawFrame {
    #[serde(default)]
    pub schema: RawSchema,
    #[serde(default)]
    pub data: RawData,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSchema {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "refId")]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub fields: Vec<RawField>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawField {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub config: Option<RawFieldConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawFieldConfig {
    #[serde(default, rename = "displayNameFromDS")]
    pub display_name_from_ds: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawData {
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
    #[serde(default)]
    pub entities: Vec<Option<Entities>>,
}

/// Row indexes of non-finite numbers, which JSON cannot carry inline.
#[derive(Debug, Default, Deserialize)]
pub struct Entities {
    #[serde(default, rename = "NaN")]
    pub nan: Vec<usize>,
    #[serde(default, rename = "Inf")]
    pub inf: Vec<usize>,
    #[serde(default, rename = "NegInf")]
    pub neg_inf: Vec<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ProxyErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Decodes a 2xx body into the frames for `ref_id`.
pub fn decode_response(body: &[u8], ref_id: &str) -> Result<Vec<Frame>> {
    let envelope: QueryEnvelope = serde_json::from_slice(body)?;
    frames_for(envelope, ref_id)
}

/// Decodes any proxy response. Non-2xx answers become a backend error when
/// they carry one for `ref_id`, and an HTTP status error otherwise.
pub fn decode_wire_response(response: &WireResponse, ref_id: &str) -> Result<Vec<Frame>> {
    if response.is_success() {
        return decode_response(&response.body, ref_id);
    }

    if let Ok(mut envelope) = serde_json::from_slice::<QueryEnvelope>(&response.body) {
        if let Some(message) = envelope.results.get_mut(ref_id).and_then(|r| r.error.take()) {
            return Err(QueryError::BackendQuery {
                ref_id: ref_id.to_string(),
                message,
            });
        }
    }

    Err(QueryError::HttpStatus {
        status: response.status,
        message: proxy_error_message(&response.body),
    })
}

/// Grafana's `{"message": ...}` when present, the raw body otherwise.
pub fn proxy_error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ProxyErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

fn frames_for(mut envelope: QueryEnvelope, ref_id: &str) -> Result<Vec<Frame>> {
    let Some(result) = envelope.results.remove(ref_id) else {
        debug!(ref_id, "response carries no result for ref id");
        return Ok(Vec::new());
    };

    if let Some(message) = result.error.filter(|e| !e.is_empty()) {
        return Err(QueryError::BackendQuery {
            ref_id: ref_id.to_string(),
            message,
        });
    }

    Ok(result
        .frames
        .into_iter()
        .map(|raw| decode_frame(raw, ref_id))
        .collect())
}

fn decode_frame(raw: RawFrame, ref_id: &str) -> Frame {
    let RawFrame { schema, data } = raw;

    let fields: Vec<FieldDescriptor> = schema
        .fields
        .into_iter()
        .map(|f| FieldDescriptor {
            role: FieldRole::from_type_tag(f.field_type.as_deref()),
            name: f.name,
            labels: f.labels.unwrap_or_default(),
            display_name: f.config.and_then(|c| c.display_name_from_ds),
        })
        .collect();

    let mut values = data.values.into_iter();
    let mut entities = data.entities.into_iter();
    let columns: Vec<Column> = fields
        .iter()
        .map_while(|field| {
            let cells = values.next()?;
            let entity = entities.next().flatten();
            Some(decode_column(field.role, cells, entity))
        })
        .collect();

    let frame = Frame::new(
        schema.name.unwrap_or_default(),
        schema.ref_id.unwrap_or_else(|| ref_id.to_string()),
        fields,
        columns,
    );
    if frame.row_count() == 0 && frame.columns.iter().any(|c| !c.is_empty()) {
        debug!(frame = %frame.name, "frame columns are inconsistent, treating as empty");
    }
    frame
}

fn decode_column(role: FieldRole, cells: Vec<Value>, entities: Option<Entities>) -> Column {
    match role {
        FieldRole::Time => Column::Time(cells.iter().map(decode_epoch_ms).collect()),
        FieldRole::Number => {
            let mut numbers: Vec<Option<f64>> = cells.iter().map(Value::as_f64).collect();
            if let Some(entities) = entities {
                let mut restore = |rows: &[usize], value: f64| {
                    for &row in rows {
                        if let Some(cell) = numbers.get_mut(row) {
                            *cell = Some(value);
                        }
                    }
                };
                restore(&entities.nan, f64::NAN);
                restore(&entities.inf, f64::INFINITY);
                restore(&entities.neg_inf, f64::NEG_INFINITY);
            }
            Column::Number(numbers)
        }
        FieldRole::String => Column::Text(
            cells
                .into_iter()
                .map(|c| match c {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        FieldRole::Other => Column::Other(cells),
    }
}

/// Epoch-ms timestamps arrive as integers or as floats depending on the
/// backend plugin.
fn decode_epoch_ms(cell: &Value) -> Option<i64> {
    match cell {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        _ => None,
    }
}
