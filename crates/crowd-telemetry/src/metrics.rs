//! Prometheus metrics for the crowd monitor.
//!
//! Covers:
//! - Push channel connectivity and reconnects
//! - Readings applied and dropped, per source and reason
//! - Fetch failures and latency
//! - Latest people count per temple
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error; it can only occur
//! during static initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};

/// Push channel state (1 = connected, 0 = disconnected).
pub static PUSH_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("crowd_push_connected", "Push channel state (1=connected)").unwrap()
});

/// Push channel reconnections.
pub static RECONNECT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("crowd_reconnect_total", "Total push channel reconnections").unwrap()
});

/// Readings merged into the view.
/// Labels: source (snapshot/push/refresh)
pub static READINGS_APPLIED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "crowd_readings_applied_total",
        "Total readings merged into the view",
        &["source"]
    )
    .unwrap()
});

/// Readings dropped before reaching the view.
/// Labels: reason (unknown_key/stale/malformed)
pub static READINGS_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "crowd_readings_dropped_total",
        "Total readings dropped",
        &["reason"]
    )
    .unwrap()
});

/// Failed fetches.
/// Labels: kind (snapshot/history/single)
pub static FETCH_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "crowd_fetch_failures_total",
        "Total failed REST fetches",
        &["kind"]
    )
    .unwrap()
});

/// Fetch latency in milliseconds.
pub static FETCH_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "crowd_fetch_duration_ms",
        "REST fetch latency in milliseconds",
        &["kind"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 10000.0]
    )
    .unwrap()
});

/// Latest people count per temple.
pub static PEOPLE_COUNT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "crowd_people_count",
        "Latest people count per temple",
        &["temple"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn push_connected() {
        PUSH_CONNECTED.set(1.0);
    }

    pub fn push_disconnected() {
        PUSH_CONNECTED.set(0.0);
    }

    pub fn reconnect() {
        RECONNECT_TOTAL.inc();
    }

    pub fn reading_applied(source: &str) {
        READINGS_APPLIED_TOTAL.with_label_values(&[source]).inc();
    }

    pub fn readings_applied(source: &str, count: usize) {
        READINGS_APPLIED_TOTAL
            .with_label_values(&[source])
            .inc_by(count as f64);
    }

    pub fn reading_dropped(reason: &str) {
        READINGS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn readings_dropped(reason: &str, count: usize) {
        READINGS_DROPPED_TOTAL
            .with_label_values(&[reason])
            .inc_by(count as f64);
    }

    /// Record the latest people count of a temple.
    pub fn people_count(temple: &str, count: u32) {
        PEOPLE_COUNT.with_label_values(&[temple]).set(f64::from(count));
    }

    pub fn fetch_failed(kind: &str) {
        FETCH_FAILURES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn fetch_duration(kind: &str, duration_ms: f64) {
        FETCH_DURATION_MS
            .with_label_values(&[kind])
            .observe(duration_ms);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
