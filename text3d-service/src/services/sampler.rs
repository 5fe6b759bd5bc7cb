//! Latent sampling with the fixed diffusion hyperparameters.

use crate::services::backends::Latent;
use crate::services::models::ModelContext;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

/// Hyperparameters passed to the diffusion sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub batch_size: usize,
    pub guidance_scale: f32,
    pub clip_denoised: bool,
    pub use_fp16: bool,
    pub use_karras: bool,
    pub karras_steps: u32,
    pub sigma_min: f32,
    pub sigma_max: f32,
    pub s_churn: f32,
    pub progress: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            batch_size: 1,
            guidance_scale: 25.0,
            clip_denoised: true,
            use_fp16: true,
            use_karras: true,
            karras_steps: 256,
            sigma_min: 0.05,
            sigma_max: 50.0,
            s_churn: 0.0,
            progress: true,
        }
    }
}

impl SamplingParams {
    /// The prompt repeated once per batch element.
    pub fn texts(&self, prompt: &str) -> Vec<String> {
        vec![prompt.to_string(); self.batch_size]
    }
}

/// Sample latents for `prompt` with the generator model.
///
/// Fails when the backend returns a different number of latents than the
/// batch size.
pub async fn sample_latents(
    models: &ModelContext,
    prompt: &str,
    params: &SamplingParams,
) -> Result<Vec<Latent>, AppError> {
    let latents = models
        .backend()
        .sample_latents(
            models.generator(),
            models.diffusion(),
            &params.texts(prompt),
            params,
        )
        .await
        .map_err(|e| AppError::GenerationFailed(anyhow::anyhow!("Latent sampling failed: {}", e)))?;

    if latents.len() != params.batch_size {
        return Err(AppError::GenerationFailed(anyhow::anyhow!(
            "Sampler returned {} latents for batch size {}",
            latents.len(),
            params.batch_size
        )));
    }

    Ok(latents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DevicePreference;
    use crate::services::backends::mock::MockBackend;
    use crate::services::models::ModelNames;
    use std::sync::Arc;

    #[test]
    fn defaults_match_fixed_configuration() {
        let params = SamplingParams::default();
        assert_eq!(params.batch_size, 1);
        assert_eq!(params.guidance_scale, 25.0);
        assert!(params.use_fp16 && params.use_karras && params.clip_denoised);
        assert_eq!(params.karras_steps, 256);
        assert_eq!(params.sigma_min, 0.05);
        assert_eq!(params.sigma_max, 50.0);
        assert_eq!(params.s_churn, 0.0);
    }

    #[test]
    fn texts_repeat_prompt_per_batch_element() {
        let params = SamplingParams {
            batch_size: 3,
            ..SamplingParams::default()
        };
        assert_eq!(params.texts("a red chair"), vec!["a red chair"; 3]);
    }

    #[tokio::test]
    async fn returns_one_latent_per_batch_element() {
        let backend = Arc::new(MockBackend::new());
        let models = ModelContext::load(backend.clone(), DevicePreference::Auto, &ModelNames::default())
            .await
            .unwrap();

        let latents = sample_latents(&models, "a red chair", &SamplingParams::default())
            .await
            .unwrap();
        assert_eq!(latents.len(), 1);
        assert_eq!(backend.sample_calls(), 1);
    }

    #[tokio::test]
    async fn backend_failure_is_a_generation_error() {
        let backend = Arc::new(MockBackend::new().failing_sampler());
        let models = ModelContext::load(backend, DevicePreference::Auto, &ModelNames::default())
            .await
            .unwrap();

        let err = sample_latents(&models, "a red chair", &SamplingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GenerationFailed(_)));
    }
}
