//! Metrics collection and export for a Weft node.
//!
//! Uses the `metrics` crate for instrumentation and exports to
//! Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "weft_messages_total";
    pub const MESSAGES_BYTES: &str = "weft_messages_bytes";
    pub const PEERS_ACTIVE: &str = "weft_peers_active";
    pub const STATUS_EVENTS_TOTAL: &str = "weft_status_events_total";
    pub const ERRORS_TOTAL: &str = "weft_errors_total";
    pub const DELIVERY_SECONDS: &str = "weft_delivery_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Messages seen, by direction");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Message payload bytes, by direction");
    metrics::describe_gauge!(names::PEERS_ACTIVE, "Currently peered sessions");
    metrics::describe_counter!(names::STATUS_EVENTS_TOTAL, "Status bus events, by code");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Error events, by code");
    metrics::describe_histogram!(
        names::DELIVERY_SECONDS,
        "Time from queue arrival to local drain"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a delivered or published message.
pub fn record_message(bytes: usize, direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction.to_string())
        .increment(bytes as u64);
}

/// Record a status bus event.
pub fn record_status_event(code: &str) {
    counter!(names::STATUS_EVENTS_TOTAL, "code" => code.to_string()).increment(1);
}

/// Record an error event.
pub fn record_error(code: &str) {
    counter!(names::ERRORS_TOTAL, "code" => code.to_string()).increment(1);
}

/// Update the peered session count.
pub fn set_active_peers(count: usize) {
    gauge!(names::PEERS_ACTIVE).set(count as f64);
}

/// Record how long a message sat in a subscriber queue.
pub fn record_delivery_latency(seconds: f64) {
    histogram!(names::DELIVERY_SECONDS).record(seconds);
}
