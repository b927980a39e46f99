use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{ProxyRequest, Transport, WireRequest, WireResponse};
use crate::error::Result;
use crate::metrics;

/// Statuses from the primary route that trigger one retry on the fallback.
pub const RETRYABLE_STATUSES: [u16; 2] = [403, 500];

fn is_retryable(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// What has been learned about a primary path so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteState {
    #[default]
    Unknown,
    PrimaryWorks,
    FallbackWorks,
}

pub trait RouteStore: Send + Sync {
    fn get(&self, primary_base: &str) -> RouteState;
    fn set(&self, primary_base: &str, state: RouteState);
    fn reset(&self);
}

#[derive(Debug, Default)]
pub struct MemoryRouteStore {
    routes: RwLock<HashMap<String, RouteState>>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

impl RouteStore for MemoryRouteStore {
    fn get(&self, primary_base: &str) -> RouteState {
        self.routes
            .read()
            .get(primary_base)
            .copied()
            .unwrap_or_default()
    }

    fn set(&self, primary_base: &str, state: RouteState) {
        // Writers only show up on the first request per path.
        if self.get(primary_base) == state {
            return;
        }
        self.routes.write().insert(primary_base.to_string(), state);
    }

    fn reset(&self) {
        self.routes.write().clear();
    }
}

lazy_static! {
    static ref GLOBAL_ROUTES: Arc<MemoryRouteStore> = Arc::new(MemoryRouteStore::new());
}

/// The process-wide route memo shared by every default `Dispatcher`.
pub fn global_route_store() -> Arc<MemoryRouteStore> {
    GLOBAL_ROUTES.clone()
}

pub fn reset_fallback_routes() {
    GLOBAL_ROUTES.reset();
}

/// A pair of path prefixes: requests go to `primary_base` and, when the
/// deployment rejects it, are replayed with that prefix swapped for
/// `fallback_base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRoute {
    pub primary_base: String,
    pub fallback_base: String,
}

impl FallbackRoute {
    pub fn new(primary_base: impl Into<String>, fallback_base: impl Into<String>) -> Self {
        Self {
            primary_base: primary_base.into(),
            fallback_base: fallback_base.into(),
        }
    }

    /// Swaps the first occurrence of the primary prefix. `None` when the
    /// path does not go through the primary prefix at all.
    pub fn rewrite(&self, path: &str) -> Option<String> {
        if self.primary_base.is_empty() || !path.contains(&self.primary_base) {
            return None;
        }
        Some(path.replacen(&self.primary_base, &self.fallback_base, 1))
    }
}

/// Resource route and legacy proxy route for a datasource. Some gateways
/// only allow one of them.
pub fn datasource_proxy_paths(uid: &str) -> FallbackRoute {
    FallbackRoute::new(
        format!("/api/datasources/uid/{}/resources", uid),
        format!("/api/datasources/proxy/uid/{}", uid),
    )
}

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    routes: Arc<dyn RouteStore>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            routes: global_route_store(),
        }
    }

    pub fn with_route_store(transport: Arc<dyn Transport>, routes: Arc<dyn RouteStore>) -> Self {
        Self { transport, routes }
    }

    pub fn route_state(&self, route: &FallbackRoute) -> RouteState {
        self.routes.get(&route.primary_base)
    }

    /// Sends `request`, retrying once on the fallback path when `route` is
    /// given and the primary answers 403 or 500.
    ///
    /// The body is buffered before anything goes on the wire. Transport
    /// errors are returned as-is on either attempt. A fallback response is
    /// returned even if it failed too.
    pub async fn send(&self, route: Option<&FallbackRoute>, request: ProxyRequest) -> Result<WireResponse> {
        let body = request.body.buffer().await?;
        let wire = WireRequest {
            method: request.method,
            path: request.path,
            query: request.query,
            headers: request.headers,
            body,
        };

        let Some(route) = route else {
            metrics::record_attempt("direct");
            return self.transport.round_trip(&wire).await;
        };
        // Paths outside the primary prefix say nothing about the route.
        let Some(path) = route.rewrite(&wire.path) else {
            metrics::record_attempt("primary");
            return self.transport.round_trip(&wire).await;
        };

        if self.routes.get(&route.primary_base) == RouteState::FallbackWorks {
            debug!(primary = %route.primary_base, path = %path, "using memoized fallback route");
            metrics::record_memo_hit();
            metrics::record_attempt("fallback");
            return self.transport.round_trip(&wire.with_path(path)).await;
        }

        metrics::record_attempt("primary");
        let primary = self.transport.round_trip(&wire).await?;
        if !is_retryable(primary.status) {
            self.routes.set(&route.primary_base, RouteState::PrimaryWorks);
            return Ok(primary);
        }

        warn!(
            status = primary.status,
            primary = %wire.path,
            fallback = %path,
            "primary route rejected, retrying on fallback"
        );
        drop(primary);

        metrics::record_attempt("fallback");
        let response = self.transport.round_trip(&wire.with_path(path)).await?;
        if !is_retryable(response.status) {
            if self.routes.get(&route.primary_base) != RouteState::FallbackWorks {
                metrics::record_fallback_learned();
            }
            self.routes.set(&route.primary_base, RouteState::FallbackWorks);
        }
        Ok(response)
    }
}
