//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    ADMISSION_ALLOWED_TOTAL, ADMISSION_DENIED_TOTAL, BROADCASTS_ACTIVE, BROADCASTS_FINISHED_TOTAL,
    BROADCASTS_STARTED_TOTAL, DELIVERIES_TOTAL, PROVIDER_RATE_LIMITED_TOTAL, SEND_LATENCY,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording broadcast lifecycle metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record_started(scheduled: bool) {
        let mode = if scheduled { "scheduled" } else { "immediate" };
        BROADCASTS_STARTED_TOTAL.with_label_values(&[mode]).inc();
        BROADCASTS_ACTIVE.inc();
    }

    pub fn record_finished(status: &str) {
        BROADCASTS_FINISHED_TOTAL.with_label_values(&[status]).inc();
        BROADCASTS_ACTIVE.dec();
    }
}

/// Helper struct for recording per-recipient delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_sent() {
        DELIVERIES_TOTAL.with_label_values(&["sent"]).inc();
    }

    pub fn record_failed(rate_limited: bool) {
        DELIVERIES_TOTAL.with_label_values(&["failed"]).inc();
        if rate_limited {
            PROVIDER_RATE_LIMITED_TOTAL.inc();
        }
    }

    pub fn observe_latency(elapsed: Duration) {
        SEND_LATENCY.observe(elapsed.as_secs_f64());
    }
}

/// Helper struct for recording admission limit decisions
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    pub fn record_allowed() {
        ADMISSION_ALLOWED_TOTAL.inc();
    }

    pub fn record_denied() {
        ADMISSION_DENIED_TOTAL.inc();
    }
}
