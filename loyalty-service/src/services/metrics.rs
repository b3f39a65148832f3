//! Prometheus metrics for loyalty-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Ledger operation counter by operation, backend mode and outcome.
pub static LEDGER_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "loyalty_ledger_operations_total",
        "Total number of ledger operations",
        &["operation", "mode", "status"]
    )
    .expect("Failed to register ledger_operations_total")
});

/// Points moved, by direction and backend mode.
pub static POINTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "loyalty_points_total",
        "Total number of points earned or redeemed",
        &["kind", "mode"]
    )
    .expect("Failed to register points_total")
});

/// Remote ledger call duration histogram by operation.
pub static REMOTE_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "loyalty_remote_call_duration_seconds",
        "Remote loyalty ledger call duration in seconds",
        &["operation", "status"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register remote_call_duration")
});

/// Authentication outcomes (register, login, session).
pub static AUTH_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "loyalty_auth_events_total",
        "Total number of authentication events",
        &["event", "status"]
    )
    .expect("Failed to register auth_events_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&LEDGER_OPERATIONS_TOTAL);
    Lazy::force(&POINTS_TOTAL);
    Lazy::force(&REMOTE_CALL_DURATION);
    Lazy::force(&AUTH_EVENTS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
