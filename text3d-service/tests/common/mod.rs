#![allow(dead_code)]

use axum::Router;
use service_core::config::Config as CoreConfig;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use text3d_service::config::{
    BackendKind, DevicePreference, GenerationConfig, ModelConfig, OutputConfig, Text3dConfig,
};
use text3d_service::mesh::MeshExporter;
use text3d_service::services::{Generator, ModelContext, ModelNames, ShapeBackend};
use text3d_service::startup::{build_router, AppState, Application};
use uuid::Uuid;

/// Configuration for tests: loopback, random port, unique output directory.
pub fn test_config(max_concurrent: usize) -> Text3dConfig {
    Text3dConfig {
        common: CoreConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        },
        models: ModelConfig {
            backend: BackendKind::Mock,
            backend_url: "http://127.0.0.1:1".to_string(),
            backend_timeout_secs: 5,
            device: DevicePreference::Auto,
            decoder: "transmitter".to_string(),
            generator: "text300M".to_string(),
            diffusion_config: "diffusion".to_string(),
        },
        output: OutputConfig {
            dir: std::env::temp_dir().join(format!("text3d-test-{}", Uuid::new_v4())),
        },
        generation: GenerationConfig {
            max_concurrent,
            timeout_secs: 0,
        },
    }
}

/// Router over `backend` for driving with `oneshot`.
pub struct TestRouter {
    pub router: Router,
    pub output_dir: PathBuf,
}

impl TestRouter {
    pub async fn new(backend: Arc<dyn ShapeBackend>) -> Self {
        Self::with_config(backend, test_config(1)).await
    }

    pub async fn with_config(backend: Arc<dyn ShapeBackend>, config: Text3dConfig) -> Self {
        let models = ModelContext::load(
            backend,
            config.models.device,
            &ModelNames::from(&config.models),
        )
        .await
        .expect("Failed to load models");
        let exporter = MeshExporter::new(&config.output.dir)
            .await
            .expect("Failed to create output directory");
        let generator = Generator::new(
            Arc::new(models),
            exporter,
            config.generation.max_concurrent,
            config.generation.timeout(),
        );

        let output_dir = config.output.dir.clone();
        let router = build_router(AppState { config, generator });

        Self { router, output_dir }
    }

    pub fn cleanup(&self) {
        std::fs::remove_dir_all(&self.output_dir).ok();
    }
}

/// A running application bound to a random loopback port.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub output_dir: PathBuf,
}

impl TestApp {
    pub async fn spawn(backend: Arc<dyn ShapeBackend>) -> Self {
        let config = test_config(1);
        let output_dir = config.output.dir.clone();

        let app = Application::build_with_backend(config, backend)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to answer health checks
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            output_dir,
        }
    }

    pub fn cleanup(&self) {
        std::fs::remove_dir_all(&self.output_dir).ok();
    }
}
