//! Model loading and the process-wide model context.
//!
//! Models are loaded once at startup; a failure here aborts the process
//! before the listener is bound. The resulting [`ModelContext`] is shared by
//! all requests through the application state.

use crate::config::{DevicePreference, ModelConfig};
use crate::services::backends::{Device, DiffusionConfig, ModelHandle, ShapeBackend};
use service_core::error::AppError;
use std::sync::Arc;

/// Names of the artifacts to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelNames {
    pub decoder: String,
    pub generator: String,
    pub diffusion_config: String,
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            decoder: "transmitter".to_string(),
            generator: "text300M".to_string(),
            diffusion_config: "diffusion".to_string(),
        }
    }
}

impl From<&ModelConfig> for ModelNames {
    fn from(config: &ModelConfig) -> Self {
        Self {
            decoder: config.decoder.clone(),
            generator: config.generator.clone(),
            diffusion_config: config.diffusion_config.clone(),
        }
    }
}

/// Resolve the configured preference against what the backend offers.
pub fn select_device(preference: DevicePreference, cuda_available: bool) -> Result<Device, AppError> {
    match (preference, cuda_available) {
        (DevicePreference::Auto, true) | (DevicePreference::Cuda, true) => Ok(Device::Cuda),
        (DevicePreference::Auto, false) | (DevicePreference::Cpu, _) => Ok(Device::Cpu),
        (DevicePreference::Cuda, false) => Err(AppError::ConfigError(anyhow::anyhow!(
            "MODEL_DEVICE=cuda but no CUDA device is available"
        ))),
    }
}

/// Loaded models bound to one device.
pub struct ModelContext {
    backend: Arc<dyn ShapeBackend>,
    device: Device,
    decoder: ModelHandle,
    generator: ModelHandle,
    diffusion: DiffusionConfig,
}

impl ModelContext {
    /// Select a device and load the decoder, generator and diffusion config.
    pub async fn load(
        backend: Arc<dyn ShapeBackend>,
        preference: DevicePreference,
        names: &ModelNames,
    ) -> Result<Self, AppError> {
        let cuda_available = backend.cuda_available().await.map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to query devices: {}", e))
        })?;
        let device = select_device(preference, cuda_available)?;

        tracing::info!(
            backend = backend.name(),
            device = %device,
            "Loading models"
        );

        let decoder = load_model(backend.as_ref(), &names.decoder, device).await?;
        let generator = load_model(backend.as_ref(), &names.generator, device).await?;
        let diffusion = backend
            .load_diffusion_config(&names.diffusion_config)
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!(
                    "Failed to load diffusion config {}: {}",
                    names.diffusion_config,
                    e
                ))
            })?;

        tracing::info!(
            decoder = %decoder.name,
            generator = %generator.name,
            diffusion = %diffusion.name,
            device = %device,
            "Loading models complete"
        );

        Ok(Self {
            backend,
            device,
            decoder,
            generator,
            diffusion,
        })
    }

    pub fn backend(&self) -> &dyn ShapeBackend {
        self.backend.as_ref()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn decoder(&self) -> &ModelHandle {
        &self.decoder
    }

    pub fn generator(&self) -> &ModelHandle {
        &self.generator
    }

    pub fn diffusion(&self) -> &DiffusionConfig {
        &self.diffusion
    }

    /// Release both models. Failures are logged, not returned.
    pub async fn shutdown(&self) {
        for model in [&self.generator, &self.decoder] {
            match self.backend.unload_model(model).await {
                Ok(()) => tracing::info!(model = %model.name, "Model unloaded"),
                Err(e) => tracing::warn!(model = %model.name, error = %e, "Failed to unload model"),
            }
        }
    }
}

async fn load_model(
    backend: &dyn ShapeBackend,
    name: &str,
    device: Device,
) -> Result<ModelHandle, AppError> {
    let handle = backend.load_model(name, device).await.map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("Failed to load model {}: {}", name, e))
    })?;
    tracing::info!(model = %handle.name, id = %handle.id, device = %handle.device, "Model loaded");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backends::mock::MockBackend;

    #[test]
    fn auto_prefers_cuda_when_available() {
        assert_eq!(select_device(DevicePreference::Auto, true).unwrap(), Device::Cuda);
        assert_eq!(select_device(DevicePreference::Auto, false).unwrap(), Device::Cpu);
    }

    #[test]
    fn cpu_preference_ignores_accelerator() {
        assert_eq!(select_device(DevicePreference::Cpu, true).unwrap(), Device::Cpu);
    }

    #[test]
    fn cuda_preference_without_accelerator_is_fatal() {
        assert!(matches!(
            select_device(DevicePreference::Cuda, false),
            Err(AppError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn loads_all_artifacts_on_selected_device() {
        let backend = Arc::new(MockBackend::new().with_cuda(true));
        let models = ModelContext::load(backend, DevicePreference::Auto, &ModelNames::default())
            .await
            .unwrap();

        assert_eq!(models.device(), Device::Cuda);
        assert_eq!(models.decoder().name, "transmitter");
        assert_eq!(models.generator().name, "text300M");
        assert_eq!(models.generator().device, Device::Cuda);
        assert_eq!(models.diffusion().name, "diffusion");
    }

    #[tokio::test]
    async fn unknown_model_fails_loading() {
        let backend = Arc::new(MockBackend::new());
        let names = ModelNames {
            generator: "image300M-missing".to_string(),
            ..ModelNames::default()
        };
        let result = ModelContext::load(backend, DevicePreference::Auto, &names).await;
        assert!(matches!(result, Err(AppError::InternalError(_))));
    }

    #[tokio::test]
    async fn shutdown_unloads_both_models() {
        let backend = Arc::new(MockBackend::new());
        let models = ModelContext::load(backend.clone(), DevicePreference::Cpu, &ModelNames::default())
            .await
            .unwrap();

        models.shutdown().await;
        assert_eq!(backend.loaded_models(), 0);
    }
}
