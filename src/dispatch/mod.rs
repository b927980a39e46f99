pub mod fallback;
pub mod http;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use reqwest::Method;

use crate::error::{QueryError, Result};

pub use fallback::{
    datasource_proxy_paths, global_route_store, reset_fallback_routes, Dispatcher, FallbackRoute,
    MemoryRouteStore, RouteState, RouteStore, RETRYABLE_STATUSES,
};
pub use http::ReqwestTransport;

/// Body of an outgoing request. Streams are drained into memory before the
/// first attempt so a retry can replay the same bytes.
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
}

impl RequestBody {
    pub async fn buffer(self) -> Result<Bytes> {
        match self {
            RequestBody::Empty => Ok(Bytes::new()),
            RequestBody::Bytes(bytes) => Ok(bytes),
            RequestBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| QueryError::BodyRead(e.to_string()))?;
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ProxyRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: None,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(path: impl Into<String>, payload: &serde_json::Value) -> Result<Self> {
        Ok(Self {
            method: Method::POST,
            path: path.into(),
            query: None,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: RequestBody::from(serde_json::to_vec(payload)?),
        })
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = if query.is_empty() { None } else { Some(query) };
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// A request whose body is fully in memory, ready to be sent any number
/// of times.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl WireRequest {
    pub fn with_path(&self, path: String) -> Self {
        Self {
            path,
            ..self.clone()
        }
    }

    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
    pub status: u16,
    pub body: Bytes,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One network round trip. Implementations must not retry internally.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: &WireRequest) -> Result<WireResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_stream_body_is_buffered() {
        let chunks = vec![Ok(Bytes::from_static(b"{\"a\":")), Ok(Bytes::from_static(b"1}"))];
        let body = RequestBody::Stream(stream::iter(chunks).boxed());
        assert_eq!(body.buffer().await.unwrap(), Bytes::from_static(b"{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_stream_body_failure_is_body_read_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "client went away")),
        ];
        let body = RequestBody::Stream(stream::iter(chunks).boxed());
        assert!(matches!(body.buffer().await, Err(QueryError::BodyRead(_))));
    }

    #[test]
    fn test_empty_and_bytes_bodies() {
        assert!(tokio_test::block_on(RequestBody::Empty.buffer()).unwrap().is_empty());
        let body = RequestBody::Bytes(Bytes::from_static(b"{}"));
        assert_eq!(tokio_test::block_on(body.buffer()).unwrap(), Bytes::from_static(b"{}"));
    }

    #[test]
    fn test_path_and_query() {
        let req = WireRequest {
            method: Method::GET,
            path: "/api/v1/labels".to_string(),
            query: Some("match[]=up".to_string()),
            headers: Vec::new(),
            body: Bytes::new(),
        };
        assert_eq!(req.path_and_query(), "/api/v1/labels?match[]=up");
        assert_eq!(req.with_path("/other".into()).path, "/other");
    }
}
