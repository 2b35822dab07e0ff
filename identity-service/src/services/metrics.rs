//! Prometheus metrics for identity-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

/// Token validation outcomes by status.
pub static TOKEN_VALIDATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_token_validations_total",
        "Total number of token validations",
        &["status"]
    )
    .expect("Failed to register token_validations_total")
});

/// Token refresh outcomes by status.
pub static TOKEN_REFRESHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_token_refreshes_total",
        "Total number of token refresh attempts",
        &["status"]
    )
    .expect("Failed to register token_refreshes_total")
});

/// Password authentications by result (no namespace label, cardinality).
pub static PASSWORD_AUTHENTICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_password_authentications_total",
        "Total number of password authentication attempts",
        &["result"]
    )
    .expect("Failed to register password_authentications_total")
});

/// Record cache lookups by record type and outcome (hit, miss, error).
pub static CACHE_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_cache_requests_total",
        "Total number of record cache operations",
        &["record", "outcome"]
    )
    .expect("Failed to register cache_requests_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "identity_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&TOKEN_VALIDATIONS_TOTAL);
    Lazy::force(&TOKEN_REFRESHES_TOTAL);
    Lazy::force(&PASSWORD_AUTHENTICATIONS_TOTAL);
    Lazy::force(&CACHE_REQUESTS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Metrics output is not valid UTF-8: {}", e);
            String::new()
        }
    }
}
