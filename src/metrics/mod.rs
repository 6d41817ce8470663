//! Metrics module
//!
//! Provides Prometheus metrics for gate decisions and upstream traffic.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, CounterVec, Histogram,
};

lazy_static! {
    // Decision metrics
    pub static ref DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "oidc_gate_decisions_total",
        "Authorization decisions by backend and outcome",
        &["backend", "outcome"]  // "allow", "bypass" or the deny reason
    ).unwrap();

    pub static ref INTROSPECTION_DURATION: Histogram = register_histogram!(
        "oidc_gate_introspection_duration_seconds",
        "Token introspection round trip in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // Upstream metrics
    pub static ref UPSTREAM_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "oidc_gate_upstream_errors_total",
        "Requests that could not be forwarded to the backend",
        &["backend"]
    ).unwrap();
}

/// Record the outcome of dispatching one request
pub fn record_decision(backend: &str, outcome: &str) {
    DECISIONS_TOTAL.with_label_values(&[backend, outcome]).inc();
}

/// Record how long the identity provider took to answer
pub fn record_introspection_duration(duration_secs: f64) {
    INTROSPECTION_DURATION.observe(duration_secs);
}

/// Record a failed forward to a backend
pub fn record_upstream_error(backend: &str) {
    UPSTREAM_ERRORS_TOTAL.with_label_values(&[backend]).inc();
}
