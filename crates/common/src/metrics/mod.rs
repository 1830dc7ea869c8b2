//! Metrics registration
//!
//! Counter names follow the `tolkbridge_*` convention; the host
//! process installs the recorder/exporter.

use metrics::{describe_counter, Unit};

/// Metrics prefix for all booking-core metrics
pub const METRICS_PREFIX: &str = "tolkbridge";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_bookings_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of bookings created"
    );

    describe_counter!(
        format!("{}_push_sent_total", METRICS_PREFIX),
        Unit::Count,
        "Push payloads handed to the gateway"
    );

    describe_counter!(
        format!("{}_push_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Push payloads the gateway rejected"
    );

    describe_counter!(
        format!("{}_sms_sent_total", METRICS_PREFIX),
        Unit::Count,
        "SMS messages accepted by the gateway"
    );

    describe_counter!(
        format!("{}_sms_failed_total", METRICS_PREFIX),
        Unit::Count,
        "SMS messages the gateway rejected"
    );

    describe_counter!(
        format!("{}_mails_sent_total", METRICS_PREFIX),
        Unit::Count,
        "Transactional mails handed to the sender"
    );

    describe_counter!(
        format!("{}_mails_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Transactional mails the sender rejected"
    );
}
