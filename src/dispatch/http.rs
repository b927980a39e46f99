use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use tracing::debug;

use super::{Transport, WireRequest, WireResponse};
use crate::config::ClientConfig;
use crate::error::{QueryError, Result};

const ORG_ID_HEADER: &str = "x-grafana-org-id";

/// `Transport` over a pooled reqwest client. Each attempt is bounded by the
/// configured timeout; the response body is read in full, up to a limit.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_response_bytes: usize,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers(config)?)
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            max_response_bytes: config.max_response_bytes,
        })
    }

    async fn attempt(&self, request: &WireRequest) -> Result<WireResponse> {
        let url = format!("{}{}", self.base_url, request.path_and_query());
        let mut builder = self.client.request(request.method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(QueryError::ResponseTooLarge(self.max_response_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(%url, status, bytes = body.len(), "proxy round trip");

        Ok(WireResponse {
            status,
            body: Bytes::from(body),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, request: &WireRequest) -> Result<WireResponse> {
        tokio::time::timeout(self.timeout, self.attempt(request))
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))?
    }
}

fn default_headers(config: &ClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("observability_query/", env!("CARGO_PKG_VERSION"))),
    );

    if let Some(key) = &config.api_key {
        let value = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|_| QueryError::Config("api key contains invalid header characters".to_string()))?;
        headers.insert(AUTHORIZATION, value);
    }
    if let Some(org) = &config.org_id {
        let value = HeaderValue::from_str(org)
            .map_err(|_| QueryError::Config(format!("invalid org id: {:?}", org)))?;
        headers.insert(HeaderName::from_static(ORG_ID_HEADER), value);
    }
    Ok(headers)
}
