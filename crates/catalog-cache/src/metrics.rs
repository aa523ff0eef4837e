//! Prometheus metrics for the caching layer.
//!
//! This module provides:
//! - Cache outcome counters (hits, misses, stale reads, consistency errors)
//! - Lock contention and refresh-ahead counters
//! - Rate-limit decisions
//! - Event publish and handler delivery counters
//!
//! Recording is a no-op until [`init_metrics`] installs a recorder, so library
//! users that do not want Prometheus pay nothing.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_STALE_READS_TOTAL: &str = "cache_stale_reads_total";
    pub const CACHE_CONSISTENCY_ERRORS_TOTAL: &str = "cache_consistency_errors_total";
    pub const CACHE_CONSISTENCY_SCORE: &str = "cache_consistency_score";
    pub const CACHE_STORE_ERRORS_TOTAL: &str = "cache_store_errors_total";

    // Stampede protection
    pub const CACHE_LOCK_CONTENTION_TOTAL: &str = "cache_lock_contention_total";
    pub const CACHE_REFRESH_AHEAD_TOTAL: &str = "cache_refresh_ahead_total";

    // Rate limiting
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "rate_limit_decisions_total";

    // Events
    pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
    pub const EVENT_HANDLER_RESULTS_TOTAL: &str = "event_handler_results_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

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
// Cache Metrics
// =============================================================================

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

pub fn record_stale_read() {
    counter!(names::CACHE_STALE_READS_TOTAL).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_consistency_error() {
    counter!(names::CACHE_CONSISTENCY_ERRORS_TOTAL).increment(1);
}

pub fn set_consistency_score(score: f64) {
    gauge!(names::CACHE_CONSISTENCY_SCORE).set(score);
}

/// Record a key-value store failure that was degraded to pass-through.
pub fn record_store_error(operation: &'static str) {
    counter!(names::CACHE_STORE_ERRORS_TOTAL, "operation" => operation).increment(1);
}

pub fn record_lock_contention(namespace: &str) {
    counter!(names::CACHE_LOCK_CONTENTION_TOTAL, "namespace" => namespace.to_string()).increment(1);
}

/// Record a background refresh result (`ok`, `error` or `skipped`).
pub fn record_refresh_ahead(result: &'static str) {
    counter!(names::CACHE_REFRESH_AHEAD_TOTAL, "result" => result).increment(1);
}

// =============================================================================
// Rate Limit Metrics
// =============================================================================

pub fn record_rate_limit_decision(allowed: bool) {
    let decision = if allowed { "allowed" } else { "rejected" };
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "decision" => decision).increment(1);
}

// =============================================================================
// Event Metrics
// =============================================================================

pub fn record_event_published(channel: &str, ok: bool) {
    counter!(
        names::EVENTS_PUBLISHED_TOTAL,
        "channel" => channel.to_string(),
        "result" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}

pub fn record_handler_result(handler: &str, ok: bool) {
    counter!(
        names::EVENT_HANDLER_RESULTS_TOTAL,
        "handler" => handler.to_string(),
        "result" => if ok { "ok" } else { "dropped" }
    )
    .increment(1);
}
