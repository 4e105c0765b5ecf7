//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Swap lifecycle transitions
//! - Oracle and finalization failures
//! - Monitor tick and finalization latency
//! - Swaps by status bucket

use crate::error::{BridgeError, BridgeResult};
use crate::events::BridgeEvent;
use crate::status::StatusSnapshot;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref EVENTS: CounterVec = register_counter_vec!(
        "bridge_events_total",
        "Total bridge events by type",
        &["event_type"]
    ).unwrap();

    pub static ref ALERTS: CounterVec = register_counter_vec!(
        "bridge_alerts_total",
        "Events that need operator attention",
        &["event_type"]
    ).unwrap();

    pub static ref TRANSITIONS: CounterVec = register_counter_vec!(
        "bridge_swap_transitions_total",
        "Swap state transitions",
        &["from", "to"]
    ).unwrap();

    pub static ref SWAPS_BY_STATUS: GaugeVec = register_gauge_vec!(
        "bridge_swaps",
        "Swaps by status bucket",
        &["status"]
    ).unwrap();

    pub static ref FINALIZATION_LATENCY: HistogramVec = register_histogram_vec!(
        "bridge_finalization_latency_seconds",
        "Time from Finalizing to a terminal state",
        &["outcome"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref TICK_DURATION: HistogramVec = register_histogram_vec!(
        "bridge_monitor_tick_seconds",
        "Duration of one monitor pass over active swaps",
        &[],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "bridge_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn render() -> BridgeResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| BridgeError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| BridgeError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_event(event: &BridgeEvent) {
    EVENTS.with_label_values(&[event.name()]).inc();
    if event.is_warning() {
        ALERTS.with_label_values(&[event.name()]).inc();
    }

    if let BridgeEvent::StateChanged { from, to, .. } = event {
        TRANSITIONS
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }
}

pub fn record_finalization(outcome: &str, latency_secs: f64) {
    FINALIZATION_LATENCY
        .with_label_values(&[outcome])
        .observe(latency_secs);
}

pub fn record_tick(duration_secs: f64) {
    TICK_DURATION.with_label_values(&[]).observe(duration_secs);
}

pub fn record_status(snapshot: &StatusSnapshot) {
    for (status, count) in [
        ("pending", snapshot.pending_count),
        ("completed", snapshot.completed_count),
        ("failed", snapshot.failed_count),
        ("expired", snapshot.expired_count),
    ] {
        SWAPS_BY_STATUS
            .with_label_values(&[status])
            .set(count as f64);
    }
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::{SwapId, SwapState};

    #[test]
    fn test_transition_counter_is_exported() {
        record_event(&BridgeEvent::StateChanged {
            swap_id: SwapId::new(),
            from: SwapState::Finalizing,
            to: SwapState::Completed,
        });

        let output = render().unwrap();
        assert!(output.contains("bridge_swap_transitions_total"));
        assert!(output.contains("to=\"completed\""));
    }
}
