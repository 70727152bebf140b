//! Prometheus metrics for the gateway.
//!
//! This module provides:
//! - HTTP request metrics (count, latency)
//! - Cache metrics (hits, misses, invalidations)
//! - Origin metrics (request outcomes, latency)
//! - Analytics ingestion counters

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";

    // Origin metrics
    pub const ORIGIN_REQUESTS_TOTAL: &str = "origin_requests_total";
    pub const ORIGIN_REQUEST_DURATION_SECONDS: &str = "origin_request_duration_seconds";

    // Analytics
    pub const ANALYTICS_EVENTS_TOTAL: &str = "analytics_events_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at server startup.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics renders the handle
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// HTTP Metrics
// =============================================================================

/// Record an HTTP request. `route` is the matched route template, not the raw path.
pub fn record_http_request(method: &str, route: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status_class" => status_class
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Cache Metrics
// =============================================================================

pub fn record_cache_hit(backend: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "backend" => backend).increment(1);
}

pub fn record_cache_miss(backend: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "backend" => backend).increment(1);
}

pub fn record_cache_invalidation(content_type: &str, deleted: usize) {
    counter!(
        names::CACHE_INVALIDATIONS_TOTAL,
        "content_type" => content_type.to_string()
    )
    .increment(deleted as u64);
}

// =============================================================================
// Origin Metrics
// =============================================================================

/// Record an origin round trip. `outcome` is `ok`, `status` or `error`.
pub fn record_origin_request(outcome: &'static str, duration: Duration) {
    counter!(names::ORIGIN_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::ORIGIN_REQUEST_DURATION_SECONDS).record(duration.as_secs_f64());
}

// =============================================================================
// Analytics Metrics
// =============================================================================

pub fn record_analytics_events(count: usize) {
    counter!(names::ANALYTICS_EVENTS_TOTAL).increment(count as u64);
}
