//! Metrics and observability utilities
//!
//! Prometheus metrics for the three workers with standardized naming
//! conventions. Recording is a no-op until an exporter is installed.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all Tarwatch metrics
pub const METRICS_PREFIX: &str = "tarwatch";

/// Buckets for per-document classification time (in seconds)
pub const CLASSIFICATION_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Collector metrics
    describe_counter!(
        format!("{}_documents_collected_total", METRICS_PREFIX),
        Unit::Count,
        "Documents discovered and stored by the collector"
    );

    describe_counter!(
        format!("{}_documents_duplicate_total", METRICS_PREFIX),
        Unit::Count,
        "Listing entries skipped because the document was already known"
    );

    describe_counter!(
        format!("{}_courts_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Court scans aborted by an error"
    );

    // Classifier metrics
    describe_counter!(
        format!("{}_documents_classified_total", METRICS_PREFIX),
        Unit::Count,
        "Documents classified, labelled by outcome"
    );

    describe_counter!(
        format!("{}_classification_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Documents whose classification failed"
    );

    describe_histogram!(
        format!("{}_classification_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-document classification latency in seconds"
    );

    describe_counter!(
        format!("{}_notifications_created_total", METRICS_PREFIX),
        Unit::Count,
        "Notifications created by fan-out"
    );

    // Dispatcher metrics
    describe_counter!(
        format!("{}_notifications_sent_total", METRICS_PREFIX),
        Unit::Count,
        "Notifications delivered through the channel"
    );

    describe_counter!(
        format!("{}_send_attempts_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Failed channel send attempts"
    );

    describe_counter!(
        format!("{}_notifications_exhausted_total", METRICS_PREFIX),
        Unit::Count,
        "Notifications left pending after exhausting their send attempts"
    );

    // Pacing
    describe_gauge!(
        format!("{}_poll_interval_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Current adaptive poll interval per worker"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record the outcome of one court scan
pub fn record_court_scan(court_id: &str, created: usize, duplicates: usize, failed: bool) {
    counter!(
        format!("{}_documents_collected_total", METRICS_PREFIX),
        "court" => court_id.to_string()
    )
    .increment(created as u64);

    counter!(
        format!("{}_documents_duplicate_total", METRICS_PREFIX),
        "court" => court_id.to_string()
    )
    .increment(duplicates as u64);

    if failed {
        counter!(
            format!("{}_courts_failed_total", METRICS_PREFIX),
            "court" => court_id.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a classification
pub fn record_classification(duration_secs: f64, outcome: &str, notifications: usize) {
    counter!(
        format!("{}_documents_classified_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if outcome == "error" {
        counter!(format!("{}_classification_errors_total", METRICS_PREFIX)).increment(1);
    }

    histogram!(format!("{}_classification_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    counter!(format!("{}_notifications_created_total", METRICS_PREFIX))
        .increment(notifications as u64);
}

/// Helper to record a delivery attempt
pub fn record_send(success: bool, urgent: bool) {
    let priority = if urgent { "urgent" } else { "normal" };

    if success {
        counter!(
            format!("{}_notifications_sent_total", METRICS_PREFIX),
            "priority" => priority
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_send_attempts_failed_total", METRICS_PREFIX),
            "priority" => priority
        )
        .increment(1);
    }
}

/// Helper to record a notification that ran out of attempts
pub fn record_exhausted() {
    counter!(format!("{}_notifications_exhausted_total", METRICS_PREFIX)).increment(1);
}

/// Helper to publish the current poll interval of a worker
pub fn record_poll_interval(worker: &'static str, secs: u64) {
    gauge!(
        format!("{}_poll_interval_seconds", METRICS_PREFIX),
        "worker" => worker
    )
    .set(secs as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in CLASSIFICATION_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recording_without_exporter() {
        record_court_scan("tar-lazio", 2, 1, false);
        record_classification(0.01, "relevant", 3);
        record_send(false, true);
        record_exhausted();
        record_poll_interval("classifier", 5);
    }
}
