//! Prometheus metrics, exposed in text format at `/metrics`.
//!
//! Mirrors the facilitator's observable surface: request counts and latencies per
//! route, cache hit/miss, rate-limit blocks, and verify/settle outcomes per scheme
//! and chain. Registered against a dedicated [`prometheus::Registry`] rather than
//! the process default so tests can construct independent instances.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry,
};

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub cache_results_total: IntCounterVec,
    pub rate_limit_decisions_total: IntCounterVec,
    pub verify_outcomes_total: IntCounterVec,
    pub settle_outcomes_total: IntCounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = register_int_counter_vec_with_registry!(
            "t402_http_requests_total",
            "HTTP requests handled, by route and status class",
            &["route", "status"],
            registry
        )
        .expect("metric registration cannot fail for a freshly constructed registry");

        let http_request_duration_seconds = register_histogram_vec_with_registry!(
            "t402_http_request_duration_seconds",
            "HTTP request handling latency",
            &["route"],
            registry
        )
        .expect("metric registration cannot fail for a freshly constructed registry");

        let cache_results_total = register_int_counter_vec_with_registry!(
            "t402_cache_results_total",
            "Cache lookups, by operation and outcome (hit/miss)",
            &["operation", "outcome"],
            registry
        )
        .expect("metric registration cannot fail for a freshly constructed registry");

        let rate_limit_decisions_total = register_int_counter_vec_with_registry!(
            "t402_rate_limit_decisions_total",
            "Rate limiter decisions, by outcome (allowed/blocked)",
            &["outcome"],
            registry
        )
        .expect("metric registration cannot fail for a freshly constructed registry");

        let verify_outcomes_total = register_int_counter_vec_with_registry!(
            "t402_verify_outcomes_total",
            "Verify outcomes, by scheme, chain, and result",
            &["scheme", "chain", "result"],
            registry
        )
        .expect("metric registration cannot fail for a freshly constructed registry");

        let settle_outcomes_total = register_int_counter_vec_with_registry!(
            "t402_settle_outcomes_total",
            "Settle outcomes, by scheme, chain, and result",
            &["scheme", "chain", "result"],
            registry
        )
        .expect("metric registration cannot fail for a freshly constructed registry");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            cache_results_total,
            rate_limit_decisions_total,
            verify_outcomes_total,
            settle_outcomes_total,
        }
    }

    pub fn record_cache(&self, operation: &str, hit: bool) {
        let outcome = if hit { "hit" } else { "miss" };
        self.cache_results_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_rate_limit(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "blocked" };
        self.rate_limit_decisions_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_verify(&self, scheme: &str, chain: &str, result: &str) {
        self.verify_outcomes_total
            .with_label_values(&[scheme, chain, result])
            .inc();
    }

    pub fn record_settle(&self, scheme: &str, chain: &str, result: &str) {
        self.settle_outcomes_total
            .with_label_values(&[scheme, chain, result])
            .inc();
    }

    /// Renders all registered metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("metrics: encoding failed: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Axum middleware recording request counts and latencies for every route it wraps.
pub async fn track_http_metrics(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // `MatchedPath` is only populated once the router has matched the request,
    // which happens inside `next.run` — so the raw path is what's available here.
    // The route set is small and fixed, so this doesn't create label cardinality.
    let route = req.uri().path().to_string();
    let timer = METRICS
        .http_request_duration_seconds
        .with_label_values(&[&route])
        .start_timer();
    let response = next.run(req).await;
    timer.observe_duration();
    let status_class = format!("{}xx", response.status().as_u16() / 100);
    METRICS
        .http_requests_total
        .with_label_values(&[&route, &status_class])
        .inc();
    response
}
