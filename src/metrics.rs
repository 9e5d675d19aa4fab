// Engine Metrics Module
// Prometheus metrics for rule operations, matches, cache clears and health probes

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::rules::ResourceKind;

lazy_static::lazy_static! {
    // State operations
    pub static ref OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rerouted_operations_total",
        "Total number of engine operations",
        &["operation", "result"]
    ).unwrap();

    pub static ref OPERATION_ERRORS: IntCounterVec = register_int_counter_vec!(
        "rerouted_operation_errors_total",
        "Total number of failed engine operations by error kind",
        &["error_kind"]
    ).unwrap();

    pub static ref REDIRECT_ENABLED: IntGauge = register_int_gauge!(
        "rerouted_redirect_enabled",
        "1 when the last observed derived state was enabled"
    ).unwrap();

    // Live matches
    pub static ref RULE_MATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rerouted_rule_matches_total",
        "Total number of requests redirected by a rule",
        &["resource_kind"]
    ).unwrap();

    // Cache invalidation
    pub static ref CACHE_INVALIDATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rerouted_cache_invalidations_total",
        "Total number of cache invalidation attempts",
        &["result"]
    ).unwrap();

    // Dev server health
    pub static ref HEALTH_PROBE_DURATION: HistogramVec = register_histogram_vec!(
        "rerouted_health_probe_duration_seconds",
        "Dev server health probe duration in seconds",
        &["result"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]
    ).unwrap();
}

/// Helper struct for recording engine metrics
pub struct EngineMetrics;

impl EngineMetrics {
    /// Record a finished state operation
    pub fn record_operation(operation: &str, error_kind: Option<&str>) {
        OPERATIONS_TOTAL
            .with_label_values(&[operation, if error_kind.is_none() { "ok" } else { "error" }])
            .inc();

        if let Some(kind) = error_kind {
            OPERATION_ERRORS.with_label_values(&[kind]).inc();
        }
    }

    pub fn record_state(enabled: bool) {
        REDIRECT_ENABLED.set(if enabled { 1 } else { 0 });
    }

    /// Record a live request redirected by a rule
    pub fn record_rule_match(kind: ResourceKind) {
        RULE_MATCHES_TOTAL.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn record_cache_invalidation(success: bool) {
        CACHE_INVALIDATIONS_TOTAL
            .with_label_values(&[if success { "success" } else { "failure" }])
            .inc();
    }

    /// Record dev server health probe duration
    pub fn record_health_probe(duration_secs: f64, online: bool) {
        HEALTH_PROBE_DURATION
            .with_label_values(&[if online { "online" } else { "offline" }])
            .observe(duration_secs);
    }

    /// Render every registered metric in the text exposition format
    pub fn render() -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
