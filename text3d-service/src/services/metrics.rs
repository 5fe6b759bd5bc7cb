//! Metrics collection and Prometheus export.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use service_core::error::AppError;
use std::sync::OnceLock;
use std::time::Duration;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Call once at startup, before any
/// metric is recorded.
pub fn init_metrics() -> Result<(), AppError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e)))?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("Metrics already initialized")))
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

/// Outcome label for a finished generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Success,
    Failure,
    Timeout,
}

impl GenerationOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            GenerationOutcome::Success => "success",
            GenerationOutcome::Failure => "failure",
            GenerationOutcome::Timeout => "timeout",
        }
    }
}

pub fn record_generation(outcome: GenerationOutcome, elapsed: Duration) {
    let labels = [("outcome", outcome.as_str())];
    counter!("text3d_generations_total", &labels).increment(1);
    histogram!("text3d_generation_duration_seconds", &labels).record(elapsed.as_secs_f64());
}

pub fn record_mesh(vertex_count: usize, file_size: usize) {
    histogram!("text3d_mesh_vertices").record(vertex_count as f64);
    histogram!("text3d_mesh_file_bytes").record(file_size as f64);
}

pub fn record_connection_check() {
    counter!("text3d_connection_checks_total").increment(1);
}
