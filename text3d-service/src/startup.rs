//! Application startup and lifecycle management.
//!
//! Models are loaded before the listener is bound, so a process that accepts
//! connections can always generate.

use crate::config::{BackendKind, Text3dConfig};
use crate::handlers;
use crate::mesh::MeshExporter;
use crate::services::{Generator, MockBackend, ModelContext, ModelNames, RemoteBackend, ShapeBackend};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Text3dConfig,
    pub generator: Generator,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(handlers::generate_model))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Backend selected by `MODEL_BACKEND`.
pub fn backend_from_config(config: &Text3dConfig) -> Result<Arc<dyn ShapeBackend>, AppError> {
    match config.models.backend {
        BackendKind::Mock => {
            tracing::warn!("Using mock model backend; generated meshes are placeholders");
            Ok(Arc::new(MockBackend::new()))
        }
        BackendKind::Remote => {
            let backend = RemoteBackend::new(
                &config.models.backend_url,
                Duration::from_secs(config.models.backend_timeout_secs),
            )
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{}", e)))?;

            tracing::info!(
                endpoint = %config.models.backend_url,
                "Initialized remote model backend"
            );
            Ok(Arc::new(backend))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    models: Arc<ModelContext>,
}

impl Application {
    /// Build the application with the configured backend.
    pub async fn build(config: Text3dConfig) -> Result<Self, AppError> {
        let backend = backend_from_config(&config)?;
        Self::build_with_backend(config, backend).await
    }

    /// Build the application around an already constructed backend.
    pub async fn build_with_backend(
        config: Text3dConfig,
        backend: Arc<dyn ShapeBackend>,
    ) -> Result<Self, AppError> {
        let models = ModelContext::load(
            backend,
            config.models.device,
            &ModelNames::from(&config.models),
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to load models: {}", e);
            e
        })?;
        let models = Arc::new(models);

        let exporter = MeshExporter::new(&config.output.dir).await.map_err(|e| {
            tracing::error!(
                "Failed to initialize output directory {}: {}",
                config.output.dir.display(),
                e
            );
            e
        })?;

        let generator = Generator::new(
            models.clone(),
            exporter,
            config.generation.max_concurrent,
            config.generation.timeout(),
        );

        tracing::info!(
            output_dir = %config.output.dir.display(),
            max_concurrent = config.generation.max_concurrent,
            timeout_secs = config.generation.timeout_secs,
            "Initialized generator"
        );

        let addr = config.common.socket_addr();
        let router = build_router(AppState {
            config: config.clone(),
            generator,
        });

        // Port 0 picks a random port for testing
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        Ok(Self {
            port,
            listener,
            router,
            models,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until SIGINT/SIGTERM, then release the models.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.models.shutdown().await;
        result
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
