//! Metrics collection and registry.

use crate::session::SessionStats;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Prometheus metrics registry for the camera session.
pub struct MetricsRegistry {
    registry: Registry,

    // Session metrics
    session_state: IntGauge,
    opens_total: IntCounter,
    open_failures_total: IntCounter,
    previews_started_total: IntCounter,
    configure_failures_total: IntCounter,
    disconnects_total: IntCounter,

    // Capture metrics
    captures_succeeded_total: IntCounter,
    captures_failed_total: IntCounter,
    busy_rejections_total: IntCounter,
    bytes_written_total: IntCounter,

    // Buffer metrics
    buffers_acquired_total: IntCounter,
    buffers_released_total: IntCounter,
    buffers_outstanding: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, MetricsError> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Counters only move forward, by the difference to the snapshot.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl MetricsRegistry {
    /// Creates a new registry with all session metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let session_state = gauge(
            &registry,
            "smart_camera_session_state",
            "Session state (0=closed, 1=opening, 2=open, 3=previewing, 4=capturing, 5=error)",
        )?;
        let opens_total = counter(
            &registry,
            "smart_camera_opens_total",
            "Successful camera device opens",
        )?;
        let open_failures_total = counter(
            &registry,
            "smart_camera_open_failures_total",
            "Camera opens that failed after all retries",
        )?;
        let previews_started_total = counter(
            &registry,
            "smart_camera_previews_started_total",
            "Preview streams started",
        )?;
        let configure_failures_total = counter(
            &registry,
            "smart_camera_configure_failures_total",
            "Capture session configurations that failed or timed out",
        )?;
        let disconnects_total = counter(
            &registry,
            "smart_camera_disconnects_total",
            "Camera handles lost to disconnects, device errors or revoked permissions",
        )?;

        let captures_succeeded_total = counter(
            &registry,
            "smart_camera_captures_succeeded_total",
            "Still captures saved to storage",
        )?;
        let captures_failed_total = counter(
            &registry,
            "smart_camera_captures_failed_total",
            "Still captures that returned an error",
        )?;
        let busy_rejections_total = counter(
            &registry,
            "smart_camera_busy_rejections_total",
            "Capture requests rejected while another was in flight",
        )?;
        let bytes_written_total = counter(
            &registry,
            "smart_camera_bytes_written_total",
            "Bytes of encoded images written",
        )?;

        let buffers_acquired_total = counter(
            &registry,
            "smart_camera_buffers_acquired_total",
            "Image buffers acquired from readers",
        )?;
        let buffers_released_total = counter(
            &registry,
            "smart_camera_buffers_released_total",
            "Image buffers released back to readers",
        )?;
        let buffers_outstanding = gauge(
            &registry,
            "smart_camera_buffers_outstanding",
            "Acquired image buffers not yet released",
        )?;

        Ok(Self {
            registry,
            session_state,
            opens_total,
            open_failures_total,
            previews_started_total,
            configure_failures_total,
            disconnects_total,
            captures_succeeded_total,
            captures_failed_total,
            busy_rejections_total,
            bytes_written_total,
            buffers_acquired_total,
            buffers_released_total,
            buffers_outstanding,
        })
    }

    /// Updates all metrics from a session snapshot.
    pub fn update(&self, stats: &SessionStats) {
        self.session_state.set(stats.state.code());

        advance(&self.opens_total, stats.opens);
        advance(&self.open_failures_total, stats.open_failures);
        advance(&self.previews_started_total, stats.previews_started);
        advance(&self.configure_failures_total, stats.configure_failures);
        advance(&self.disconnects_total, stats.disconnects);

        advance(&self.captures_succeeded_total, stats.captures_succeeded);
        advance(&self.captures_failed_total, stats.captures_failed);
        advance(&self.busy_rejections_total, stats.busy_rejections);
        advance(&self.bytes_written_total, stats.bytes_written);

        advance(&self.buffers_acquired_total, stats.buffers_acquired);
        advance(&self.buffers_released_total, stats.buffers_released);
        self.buffers_outstanding
            .set(stats.buffers_acquired.saturating_sub(stats.buffers_released) as i64);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
