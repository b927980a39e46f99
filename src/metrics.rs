use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

use crate::error::{QueryError, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Dispatch metrics
    pub static ref DISPATCH_ATTEMPTS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("obsq_dispatch_attempts_total", "Proxy round trips by route"),
        &["route"]
    ));

    pub static ref FALLBACK_ROUTES_LEARNED: IntCounter = register(IntCounter::new(
        "obsq_fallback_routes_learned_total",
        "Primary paths memoized as requiring the fallback route"
    ));

    pub static ref FALLBACK_MEMO_HITS: IntCounter = register(IntCounter::new(
        "obsq_fallback_memo_hits_total",
        "Requests sent straight to the fallback route"
    ));

    // Query metrics
    pub static ref QUERY_DURATION: HistogramVec = register(HistogramVec::new(
        HistogramOpts::new("obsq_query_duration_seconds", "End-to-end query duration in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 30.0]),
        &["backend"]
    ));

    pub static ref QUERY_ERRORS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("obsq_query_errors_total", "Failed queries by backend"),
        &["backend"]
    ));

    pub static ref EMPTY_RESULTS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("obsq_empty_results_total", "Queries answered with no data, by backend"),
        &["backend"]
    ));
}

fn register<C>(collector: prometheus::Result<C>) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector = collector.expect("metric definition is valid");
    REGISTRY
        .register(Box::new(collector.clone()))
        .expect("metric registered once");
    collector
}

pub struct QueryTimer {
    backend: String,
    start: Instant,
}

impl QueryTimer {
    pub fn new(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for QueryTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        QUERY_DURATION
            .with_label_values(&[&self.backend])
            .observe(duration);
    }
}

pub fn record_attempt(route: &str) {
    DISPATCH_ATTEMPTS.with_label_values(&[route]).inc();
}

pub fn record_fallback_learned() {
    FALLBACK_ROUTES_LEARNED.inc();
}

pub fn record_memo_hit() {
    FALLBACK_MEMO_HITS.inc();
}

pub fn record_query_error(backend: &str) {
    QUERY_ERRORS.with_label_values(&[backend]).inc();
}

pub fn record_empty_result(backend: &str) {
    EMPTY_RESULTS.with_label_values(&[backend]).inc();
}

/// Text exposition of every collector in the crate registry.
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| QueryError::Config(format!("encoding metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| QueryError::Config(format!("encoding metrics: {}", e)))
}
