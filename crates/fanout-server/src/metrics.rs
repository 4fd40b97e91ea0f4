//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use fanout_core::{HubHandle, HubStats};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "fanout_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "fanout_connections_active";
    pub const MESSAGES_TOTAL: &str = "fanout_messages_total";
    pub const MESSAGES_BYTES: &str = "fanout_messages_bytes";
    pub const AUTH_FAILURES_TOTAL: &str = "fanout_auth_failures_total";
    pub const BUS_EVENTS_TOTAL: &str = "fanout_bus_events_total";
    pub const ERRORS_TOTAL: &str = "fanout_errors_total";
    pub const HUB_CONNECTIONS: &str = "fanout_hub_connections";
    pub const HUB_ROOMS: &str = "fanout_hub_rooms";
    pub const HUB_DELIVERY_ATTEMPTS: &str = "fanout_hub_delivery_attempts";
    pub const HUB_EVICTIONS: &str = "fanout_hub_evictions";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(names::AUTH_FAILURES_TOTAL, "Refused upgrade attempts");
    metrics::describe_counter!(names::BUS_EVENTS_TOTAL, "Messages received from the event bus");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");
    metrics::describe_gauge!(names::HUB_CONNECTIONS, "Connections registered with the hub");
    metrics::describe_gauge!(names::HUB_ROOMS, "Live rooms by kind");
    metrics::describe_gauge!(
        names::HUB_DELIVERY_ATTEMPTS,
        "Non-blocking enqueue attempts since start"
    );
    metrics::describe_gauge!(
        names::HUB_EVICTIONS,
        "Connections evicted for a full delivery queue"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a refused upgrade.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Record a message from the event bus.
pub fn record_bus_event() {
    counter!(names::BUS_EVENTS_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Publish a hub statistics snapshot.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::HUB_CONNECTIONS).set(stats.connections as f64);
    gauge!(names::HUB_ROOMS, "kind" => "tenant").set(stats.tenant_rooms as f64);
    gauge!(names::HUB_ROOMS, "kind" => "topic").set(stats.topic_rooms as f64);
    gauge!(names::HUB_DELIVERY_ATTEMPTS).set(stats.delivery_attempts as f64);
    gauge!(names::HUB_EVICTIONS).set(stats.evictions as f64);
}

/// Sample hub statistics every `interval` until cancelled or the hub stops.
pub async fn report_hub_stats(hub: HubHandle, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match hub.stats().await {
                    Ok(stats) => record_hub_stats(&stats),
                    Err(_) => break,
                }
            }
        }
    }
    debug!("Hub stats reporter stopped");
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::{Hub, HubConfig};

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; must not panic.
        let _guard = ConnectionMetricsGuard::new();
    }

    #[tokio::test]
    async fn test_reporter_stops_with_hub() {
        let (hub, task) = Hub::spawn(&HubConfig::default());
        let reporter = tokio::spawn(report_hub_stats(
            hub.clone(),
            Duration::from_millis(5),
            CancellationToken::new(),
        ));

        hub.shutdown().await.unwrap();
        task.await.unwrap();
        reporter.await.unwrap();
    }

    #[tokio::test]
    async fn test_reporter_stops_on_cancel() {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let cancel = CancellationToken::new();
        let reporter = tokio::spawn(report_hub_stats(hub, Duration::from_secs(60), cancel.clone()));

        cancel.cancel();
        reporter.await.unwrap();
    }
}
