use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::backend::BackendKind;
use crate::frame::REF_ID;
use crate::materialize::{LogMode, QueryShape};
use crate::resolver::TimeRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasourceRef {
    pub uid: String,
    pub datasource_type: String,
}

impl DatasourceRef {
    pub fn new(uid: impl Into<String>, datasource_type: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            datasource_type: datasource_type.into(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        BackendKind::from_type(&self.datasource_type)
    }
}

/// A query as the tool layer hands it over: raw query text with macros,
/// user time strings, and any backend-specific model fields.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub datasource: DatasourceRef,
    pub query: String,
    pub shape: QueryShape,
    pub start: String,
    pub end: String,
    pub variables: BTreeMap<String, String>,
    pub model: Map<String, Value>,
    pub max_data_points: Option<u32>,
    pub rate_interval: Option<Duration>,
}

impl QueryRequest {
    pub fn new(datasource: DatasourceRef, query: impl Into<String>, shape: QueryShape) -> Self {
        Self {
            datasource,
            query: query.into(),
            shape,
            start: String::new(),
            end: String::new(),
            variables: BTreeMap::new(),
            model: Map::new(),
            max_data_points: None,
            rate_interval: None,
        }
    }

    pub fn with_time(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = start.into();
        self.end = end.into();
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_model_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.model.insert(key.into(), value);
        self
    }

    pub fn with_rate_interval(mut self, rate_interval: Duration) -> Self {
        self.rate_interval = Some(rate_interval);
        self
    }

    pub fn with_max_data_points(mut self, max_data_points: u32) -> Self {
        self.max_data_points = Some(max_data_points);
        self
    }
}

/// Builds the `/api/ds/query` body for a single target.
pub fn build_payload(
    request: &QueryRequest,
    processed_query: &str,
    range: TimeRange,
    interval: Duration,
    max_data_points: u32,
) -> Value {
    let backend = request.datasource.backend();

    let mut target = Map::new();
    target.insert("refId".to_string(), json!(REF_ID));
    target.insert(
        "datasource".to_string(),
        json!({"uid": request.datasource.uid, "type": request.datasource.datasource_type}),
    );
    target.insert(backend.expression_key().to_string(), json!(processed_query));
    target.insert("intervalMs".to_string(), json!(interval.as_millis() as u64));
    target.insert("maxDataPoints".to_string(), json!(max_data_points));

    match backend {
        BackendKind::Prometheus => {
            target.insert("instant".to_string(), json!(request.shape.is_instant()));
            target.insert("range".to_string(), json!(!request.shape.is_instant()));
        }
        BackendKind::Loki => {
            let query_type = if request.shape.is_instant() { "instant" } else { "range" };
            target.insert("queryType".to_string(), json!(query_type));
        }
        _ => {}
    }
    match request.shape {
        QueryShape::Table => {
            target.insert("format".to_string(), json!("table"));
        }
        QueryShape::Log(LogMode::Range) if backend == BackendKind::ClickHouse => {
            target.insert("format".to_string(), json!("logs"));
        }
        _ => {}
    }

    for (key, value) in &request.model {
        target.insert(key.clone(), value.clone());
    }

    json!({
        "queries": [Value::Object(target)],
        "from": range.from_ms().to_string(),
        "to": range.to_ms().to_string(),
    })
}
