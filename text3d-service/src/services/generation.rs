//! Prompt-to-file generation pipeline.
//!
//! Sampling, decoding, color post-processing and export run under a
//! semaphore permit so the number of concurrent generations on the shared
//! device is bounded (one at a time by default). The handle each export was
//! written through is what the caller streams, so a concurrent request whose
//! prompt maps to the same file name cannot swap the contents.

use crate::mesh::{glb, ExportedModel, MeshError, MeshExporter};
use crate::services::metrics::{self, GenerationOutcome};
use crate::services::models::ModelContext;
use crate::services::sampler::{sample_latents, SamplingParams};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct Generator {
    models: Arc<ModelContext>,
    exporter: MeshExporter,
    permits: Arc<Semaphore>,
    params: SamplingParams,
    timeout: Option<Duration>,
}

impl Generator {
    pub fn new(
        models: Arc<ModelContext>,
        exporter: MeshExporter,
        max_concurrent: usize,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            models,
            exporter,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            params: SamplingParams::default(),
            timeout,
        }
    }

    pub fn models(&self) -> &ModelContext {
        &self.models
    }

    /// Generate and export the mesh for `prompt`.
    ///
    /// Requests beyond the concurrency limit wait for a permit in arrival
    /// order. The timeout, when configured, covers only the work done while
    /// holding the permit.
    #[tracing::instrument(skip(self), fields(device = %self.models.device()))]
    pub async fn generate(&self, prompt: &str) -> Result<ExportedModel, AppError> {
        if self.permits.available_permits() == 0 {
            tracing::info!("Waiting for a free generation slot");
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        let start = Instant::now();
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(prompt))
                .await
                .unwrap_or_else(|_| Err(AppError::Timeout(limit.as_secs()))),
            None => self.run(prompt).await,
        };

        let outcome = match &result {
            Ok(_) => GenerationOutcome::Success,
            Err(AppError::Timeout(_)) => GenerationOutcome::Timeout,
            Err(_) => GenerationOutcome::Failure,
        };
        metrics::record_generation(outcome, start.elapsed());

        result
    }

    async fn run(&self, prompt: &str) -> Result<ExportedModel, AppError> {
        tracing::info!("Generating latents for 3D model");
        let latents = sample_latents(&self.models, prompt, &self.params).await?;

        tracing::info!(
            path = %self.exporter.path_for(prompt).display(),
            latents = latents.len(),
            "Processing and saving the generated model"
        );

        // Every latent exports to the same prompt-derived path; with the
        // fixed batch size of one there is exactly one.
        let mut exported: Option<ExportedModel> = None;
        for (index, latent) in latents.iter().enumerate() {
            let decoded = self
                .models
                .backend()
                .decode_mesh(self.models.decoder(), latent)
                .await
                .map_err(|e| {
                    AppError::GenerationFailed(anyhow::anyhow!(
                        "Decoding latent {} failed: {}",
                        index,
                        e
                    ))
                })?;

            let (bytes, vertex_count) = tokio::task::spawn_blocking(move || encode_colored(decoded))
                .await
                .map_err(|e| {
                    AppError::InternalError(anyhow::anyhow!("Mesh processing task failed: {}", e))
                })?
                .map_err(|e| AppError::GenerationFailed(anyhow::Error::new(e)))?;

            metrics::record_mesh(vertex_count, bytes.len());
            tracing::debug!(index, vertex_count, size = bytes.len(), "Latent processed");

            exported = Some(self.exporter.export(prompt, bytes).await?);
        }

        let model = exported.ok_or_else(|| {
            AppError::GenerationFailed(anyhow::anyhow!("Sampler produced no latents"))
        })?;

        tracing::info!(
            file = %model.file_name,
            size = model.size,
            "Model generation completed"
        );

        Ok(model)
    }
}

/// Normalize vertex colors and encode as GLB; returns the bytes and the
/// vertex count.
fn encode_colored(decoded: crate::mesh::DecodedMesh) -> Result<(Vec<u8>, usize), MeshError> {
    let colored = decoded.into_colored()?;
    let vertex_count = colored.vertex_count();
    Ok((glb::encode(&colored)?, vertex_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DevicePreference;
    use crate::mesh::glb::GlbSummary;
    use crate::services::backends::mock::MockBackend;
    use crate::services::backends::ShapeBackend;
    use crate::services::models::ModelNames;
    use std::path::{Path, PathBuf};
    use tokio::io::AsyncReadExt;
    use uuid::Uuid;

    async fn generator_with(
        backend: Arc<MockBackend>,
        max_concurrent: usize,
        timeout: Option<Duration>,
    ) -> (Generator, PathBuf) {
        let dir = std::env::temp_dir().join(format!("text3d-gen-{}", Uuid::new_v4()));
        let shape_backend: Arc<dyn ShapeBackend> = backend;
        let models = ModelContext::load(shape_backend, DevicePreference::Auto, &ModelNames::default())
            .await
            .unwrap();
        let exporter = MeshExporter::new(&dir).await.unwrap();
        (
            Generator::new(Arc::new(models), exporter, max_concurrent, timeout),
            dir,
        )
    }

    #[tokio::test]
    async fn produces_named_verified_glb() {
        let (generator, dir) = generator_with(Arc::new(MockBackend::new()), 1, None).await;

        let mut model = generator.generate("a red chair").await.unwrap();
        assert_eq!(model.file_name, "a_red_chair_model.glb");
        assert_eq!(model.path, dir.join("a_red_chair_model.glb"));

        let mut bytes = Vec::new();
        model.file.read_to_end(&mut bytes).await.unwrap();
        let summary = GlbSummary::parse(&bytes).unwrap();
        assert_eq!(summary.vertex_count, summary.color_count);
        assert_eq!(summary.index_count % 3, 0);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn uniform_colors_export_as_mid_gray() {
        let backend = Arc::new(MockBackend::new().uniform_colors());
        let (generator, dir) = generator_with(backend, 1, None).await;

        let mut model = generator.generate("gray box").await.unwrap();
        let mut bytes = Vec::new();
        model.file.read_to_end(&mut bytes).await.unwrap();
        let summary = GlbSummary::parse(&bytes).unwrap();
        assert!(summary.colors.iter().all(|&c| c == [128, 128, 128]));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn decoder_failure_leaves_no_file() {
        let backend = Arc::new(MockBackend::new().failing_decoder());
        let (generator, dir) = generator_with(backend, 1, None).await;

        let err = generator.generate("a red chair").await.unwrap_err();
        assert!(matches!(err, AppError::GenerationFailed(_)));
        assert!(!dir.join("a_red_chair_model.glb").exists());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let backend = Arc::new(MockBackend::new().with_sample_delay(Duration::from_millis(500)));
        let (generator, dir) = generator_with(backend, 1, Some(Duration::from_millis(50))).await;

        let err = generator.generate("slow chair").await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn single_permit_serializes_generations() {
        let backend = Arc::new(MockBackend::new().with_sample_delay(Duration::from_millis(50)));
        let (generator, dir) = generator_with(backend.clone(), 1, None).await;

        let (a, b) = tokio::join!(generator.generate("chair"), generator.generate("table"));
        assert_eq!(a.unwrap().file_name, "chair_model.glb");
        assert_eq!(b.unwrap().file_name, "table_model.glb");
        assert_eq!(backend.max_concurrent_samples(), 1);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn wider_limit_allows_overlap() {
        let backend = Arc::new(MockBackend::new().with_sample_delay(Duration::from_millis(100)));
        let (generator, dir) = generator_with(backend.clone(), 2, None).await;

        let (a, b) = tokio::join!(generator.generate("chair"), generator.generate("table"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.max_concurrent_samples(), 2);

        std::fs::remove_dir_all(dir).ok();
    }

    async fn read_all(mut model: ExportedModel) -> Vec<u8> {
        let mut bytes = Vec::new();
        model.file.read_to_end(&mut bytes).await.unwrap();
        bytes
    }

    fn temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    #[tokio::test]
    async fn colliding_file_names_keep_their_own_contents() {
        let (generator, dir) = generator_with(Arc::new(MockBackend::new()), 2, None).await;

        let spaced = read_all(generator.generate("a b").await.unwrap()).await;
        let underscored = read_all(generator.generate("a_b").await.unwrap()).await;
        assert_ne!(spaced, underscored);

        for round in 0..50 {
            let (a, b) = tokio::join!(generator.generate("a b"), generator.generate("a_b"));
            let (a, b) = (a.unwrap(), b.unwrap());
            assert_eq!(a.file_name, "a_b_model.glb");
            assert_eq!(b.file_name, "a_b_model.glb");
            assert_eq!(read_all(a).await, spaced, "round {}", round);
            assert_eq!(read_all(b).await, underscored, "round {}", round);
        }

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn timeouts_leave_no_temp_files() {
        let (generator, dir) = generator_with(Arc::new(MockBackend::new()), 1, None).await;

        for micros in (50..3000).step_by(50) {
            let limited = Generator::new(
                generator.models.clone(),
                generator.exporter.clone(),
                1,
                Some(Duration::from_micros(micros)),
            );
            let _ = limited.generate("leak test").await;
        }

        // Exports cut off by a timeout finish in the background.
        for _ in 0..100 {
            if temp_files(&dir).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(temp_files(&dir).is_empty(), "left behind: {:?}", temp_files(&dir));

        std::fs::remove_dir_all(dir).ok();
    }
}
