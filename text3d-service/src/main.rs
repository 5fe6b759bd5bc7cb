use service_core::observability::init_tracing;
use text3d_service::config::Text3dConfig;
use text3d_service::services::init_metrics;
use text3d_service::startup::Application;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize metrics recorder (must be before any metrics are recorded)
    init_metrics().map_err(|e| std::io::Error::other(format!("Metrics error: {}", e)))?;

    let otlp_endpoint = std::env::var("OTLP_ENDPOINT").ok();
    init_tracing("text3d-service", "info", otlp_endpoint.as_deref())
        .map_err(|e| std::io::Error::other(format!("Tracing error: {}", e)))?;

    let config = Text3dConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to start text3d-service: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    app.run_until_stopped().await
}
