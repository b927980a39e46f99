use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::request::{build_payload, QueryRequest};
use crate::backend::BackendKind;
use crate::config::ClientConfig;
use crate::diagnostics::{diagnose, Diagnostics, HintContext};
use crate::dispatch::{datasource_proxy_paths, Dispatcher, FallbackRoute, ProxyRequest, ReqwestTransport};
use crate::error::{QueryError, Result};
use crate::frame::{decode_wire_response, proxy_error_message, REF_ID};
use crate::materialize::{materialize, MaterializedResult};
use crate::metrics::{self, QueryTimer};
use crate::resolver::{resolve_time_range, MacroContext, TimeRange};

pub const QUERY_PATH: &str = "/api/ds/query";

/// Everything derived from a request before it goes on the wire.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub backend: BackendKind,
    pub range: TimeRange,
    pub processed_query: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    #[serde(flatten)]
    pub result: MaterializedResult,
    #[serde(skip_serializing_if = "Option::is_none", rename = "hints")]
    pub diagnostics: Option<Diagnostics>,
    pub processed_query: String,
    pub time_range: TimeRange,
}

#[derive(Clone)]
pub struct QueryClient {
    config: ClientConfig,
    dispatcher: Dispatcher,
    query_route: Option<FallbackRoute>,
}

impl QueryClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_dispatcher(config, Dispatcher::new(Arc::new(transport))))
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn with_dispatcher(config: ClientConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            query_route: None,
        }
    }

    /// Route used for `/api/ds/query`. Without one the query endpoint is
    /// called directly, with no fallback.
    pub fn with_query_route(mut self, route: FallbackRoute) -> Self {
        self.query_route = Some(route);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolves the time window and macros and builds the wire payload.
    pub fn prepare(&self, request: &QueryRequest) -> Result<PreparedQuery> {
        let backend = request.datasource.backend();
        let range = resolve_time_range(&request.start, &request.end)?;
        let max_data_points = request.max_data_points.unwrap_or(self.config.max_data_points);

        let macros = MacroContext::new(range)
            .with_max_data_points(max_data_points)
            .with_rate_interval(request.rate_interval.unwrap_or(self.config.rate_interval))
            .with_variables(request.variables.clone());
        let processed_query = macros.substitute(&request.query)?;
        let payload = build_payload(request, &processed_query, range, macros.interval(), max_data_points);

        Ok(PreparedQuery {
            backend,
            range,
            processed_query,
            payload,
        })
    }

    /// Runs one query end to end and attaches hints when nothing came back.
    pub async fn execute(&self, request: QueryRequest) -> Result<QueryOutcome> {
        let backend = request.datasource.backend();
        let _timer = QueryTimer::new(backend.as_str());

        let outcome = self.run(&request).await;
        if let Err(e) = &outcome {
            metrics::record_query_error(backend.as_str());
            warn!(%backend, uid = %request.datasource.uid, error = %e, "query failed");
        }
        outcome
    }

    async fn run(&self, request: &QueryRequest) -> Result<QueryOutcome> {
        let prepared = self.prepare(request)?;
        info!(
            backend = %prepared.backend,
            uid = %request.datasource.uid,
            shape = request.shape.as_str(),
            window = %prepared.range.describe(),
            "executing query"
        );

        let proxy_request = ProxyRequest::post_json(QUERY_PATH, &prepared.payload)?;
        let response = self
            .dispatcher
            .send(self.query_route.as_ref(), proxy_request)
            .await?;
        let frames = decode_wire_response(&response, REF_ID)?;
        debug!(frames = frames.len(), "decoded response");

        let result = materialize(&frames, request.shape);
        let diagnostics = diagnose(
            &result,
            &HintContext {
                backend: &prepared.backend,
                query: &request.query,
                processed_query: &prepared.processed_query,
                range: Some(prepared.range),
            },
        );
        if diagnostics.is_some() {
            metrics::record_empty_result(prepared.backend.as_str());
        }

        Ok(QueryOutcome {
            result,
            diagnostics,
            processed_query: prepared.processed_query,
            time_range: prepared.range,
        })
    }

    /// GETs a datasource resource (`api/v1/labels`, `loki/api/v1/label`,
    /// ...) through the resource route, falling back to the legacy proxy
    /// route where the deployment requires it.
    pub async fn datasource_resource(&self, uid: &str, resource: &str, query: &str) -> Result<Bytes> {
        let route = datasource_proxy_paths(uid);
        let path = format!("{}/{}", route.primary_base, resource.trim_start_matches('/'));
        let response = self
            .dispatcher
            .send(Some(&route), ProxyRequest::get(path).with_query(query))
            .await?;

        if !response.is_success() {
            return Err(QueryError::HttpStatus {
                status: response.status,
                message: proxy_error_message(&response.body),
            });
        }
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::request::DatasourceRef;
    use crate::dispatch::{MemoryRouteStore, Transport, WireRequest, WireResponse};
    use crate::materialize::QueryShape;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    struct CannedTransport {
        status: u16,
        body: Value,
        seen: Mutex<Vec<WireRequest>>,
    }

    impl CannedTransport {
        fn new(status: u16, body: Value) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn round_trip(&self, request: &WireRequest) -> Result<WireResponse> {
            self.seen.lock().push(request.clone());
            Ok(WireResponse {
                status: self.status,
                body: Bytes::from(serde_json::to_vec(&self.body)?),
            })
        }
    }

    fn client(transport: Arc<CannedTransport>) -> QueryClient {
        let dispatcher = Dispatcher::with_route_store(transport, Arc::new(MemoryRouteStore::new()));
        QueryClient::with_dispatcher(ClientConfig::default(), dispatcher)
    }

    fn prometheus(query: &str, shape: QueryShape) -> QueryRequest {
        QueryRequest::new(DatasourceRef::new("prom", "prometheus"), query, shape)
    }

    #[test]
    fn test_prepare_substitutes_rate_interval() {
        let client = client(CannedTransport::new(200, json!({})));
        let request = prometheus("rate(x[$__rate_interval])", QueryShape::Range)
            .with_rate_interval(Duration::from_secs(300));
        let prepared = client.prepare(&request).unwrap();
        assert_eq!(prepared.processed_query, "rate(x[5m])");
        assert_eq!(prepared.payload["queries"][0]["expr"], json!("rate(x[5m])"));
        assert_eq!(prepared.range.span(), Duration::from_secs(3_600));
    }

    #[test]
    fn test_prepare_rejects_bad_time() {
        let client = client(CannedTransport::new(200, json!({})));
        let request = prometheus("up", QueryShape::Instant).with_time("last tuesday", "");
        assert!(matches!(client.prepare(&request), Err(QueryError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_empty_instant_result_gets_hints() {
        let transport = CannedTransport::new(200, json!({"results": {"A": {"status": 200, "frames": []}}}));
        let client = client(transport.clone());

        let outcome = client
            .execute(prometheus(r#"{container=~".+"}"#, QueryShape::Instant))
            .await
            .unwrap();

        assert_eq!(outcome.result, MaterializedResult::InstantVector(vec![]));
        let hints = outcome.diagnostics.expect("empty result carries hints");
        assert!(hints.summary.contains("Prometheus"));

        let seen = transport.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, QUERY_PATH);
        assert_eq!(seen[0].method, reqwest::Method::POST);
    }

    #[tokio::test]
    async fn test_backend_error_is_typed() {
        let transport = CannedTransport::new(
            400,
            json!({"results": {"A": {"status": 400, "error": "bad_data: unexpected character"}}}),
        );
        let err = client(transport)
            .execute(prometheus("up{", QueryShape::Instant))
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(matches!(err, QueryError::BackendQuery { ref ref_id, .. } if ref_id == "A"));
    }

    #[tokio::test]
    async fn test_outcome_serialization() {
        let transport = CannedTransport::new(
            200,
            json!({"results": {"A": {"frames": [{
                "schema": {"name": "up", "fields": [
                    {"name": "Time", "type": "time"},
                    {"name": "Value", "type": "number", "labels": {"job": "api"}}
                ]},
                "data": {"values": [[1705312800000i64], [1]]}
            }]}}}),
        );
        let outcome = client(transport)
            .execute(prometheus("up", QueryShape::Instant).with_time("2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z"))
            .await
            .unwrap();
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["resultType"], json!("instantVector"));
        assert_eq!(v["result"][0]["labels"], json!({"__name__": "up", "job": "api"}));
        assert!(v.get("hints").is_none());
        assert_eq!(v["processedQuery"], json!("up"));
    }

    #[tokio::test]
    async fn test_resource_error_status() {
        let transport = CannedTransport::new(404, json!({"message": "Not found"}));
        let err = client(transport)
            .datasource_resource("prom", "/api/v1/labels", "")
            .await
            .unwrap_err();
        match err {
            QueryError::HttpStatus { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Not found");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
