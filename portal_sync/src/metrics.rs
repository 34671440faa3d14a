//! Prometheus metrics for sync and discovery observability.

use metrics::{counter, gauge, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("portal_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record the outcome of one catalog file sync.
pub fn catalog_sync_result(outcome: &str) {
    counter!("portal_catalog_sync_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a discovery sweep and how many resources it retired.
pub fn resources_marked_deleted(count: u64) {
    counter!("portal_discovery_sweeps_total").increment(1);
    counter!("portal_resources_marked_deleted_total").increment(count);
}

/// Record a resource type whose listing failed during a sweep.
pub fn discovery_type_failed(resource_type: &str) {
    counter!("portal_discovery_type_failures_total", "type" => resource_type.to_string())
        .increment(1);
}

/// Record a finished provisioning job.
pub fn provisioning_finished(status: &str, duration_ms: u64) {
    counter!("portal_provisioning_total", "status" => status.to_string()).increment(1);
    histogram!("portal_provisioning_duration_ms").record(duration_ms as f64);
}

/// Set the number of provisioning jobs currently running.
pub fn provisioning_in_flight(count: usize) {
    gauge!("portal_provisioning_in_flight").set(count as f64);
}
