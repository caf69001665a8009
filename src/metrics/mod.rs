//! Prometheus metrics for the broadcast service.
//!
//! - Broadcast metrics (started, finished by status, currently active)
//! - Delivery metrics (outcome per recipient, provider rate limits, send latency)
//! - Admission metrics (per-page broadcast limit decisions)

mod helpers;

pub use helpers::{encode_metrics, AdmissionMetrics, BroadcastMetrics, DeliveryMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "pagecast";

lazy_static! {
    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Broadcasts accepted, by mode (immediate or scheduled)
    pub static ref BROADCASTS_STARTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_started_total", METRIC_PREFIX),
        "Total broadcasts accepted",
        &["mode"]
    ).unwrap();

    /// Broadcasts finished, by final status
    pub static ref BROADCASTS_FINISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_finished_total", METRIC_PREFIX),
        "Total broadcasts finished by final status",
        &["status"]
    ).unwrap();

    /// Broadcasts currently sending or waiting for their scheduled time
    pub static ref BROADCASTS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_broadcasts_active", METRIC_PREFIX),
        "Broadcasts currently running or scheduled"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Per-recipient deliveries by outcome
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total per-recipient deliveries by outcome",
        &["outcome"]
    ).unwrap();

    /// Sends rejected by the provider's rate limit
    pub static ref PROVIDER_RATE_LIMITED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_provider_rate_limited_total", METRIC_PREFIX),
        "Total sends rejected by the provider rate limit"
    ).unwrap();

    /// Send API call latency
    pub static ref SEND_LATENCY: Histogram = register_histogram!(
        format!("{}_send_latency_seconds", METRIC_PREFIX),
        "Latency of a single send call in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Admission Metrics
    // ============================================================================

    /// Broadcast requests admitted by the per-page limit
    pub static ref ADMISSION_ALLOWED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_admission_allowed_total", METRIC_PREFIX),
        "Broadcast requests admitted by the per-page limit"
    ).unwrap();

    /// Broadcast requests rejected by the per-page limit
    pub static ref ADMISSION_DENIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_admission_denied_total", METRIC_PREFIX),
        "Broadcast requests rejected by the per-page limit"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        BROADCASTS_ACTIVE.set(0);

        let output = encode_metrics().unwrap();
        assert!(output.contains("pagecast_broadcasts_active"));
    }

    #[test]
    fn test_delivery_metrics() {
        DeliveryMetrics::record_sent();
        DeliveryMetrics::record_failed(true);
        DeliveryMetrics::observe_latency(std::time::Duration::from_millis(120));
        assert!(PROVIDER_RATE_LIMITED_TOTAL.get() >= 1);
        assert!(DELIVERIES_TOTAL.with_label_values(&["failed"]).get() >= 1);
    }
}
