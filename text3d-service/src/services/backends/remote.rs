//! Remote inference sidecar backend.
//!
//! The sidecar hosts the model weights and exposes a small JSON API; every
//! call carries the caller's trace context.

use super::{BackendError, Device, DiffusionConfig, Latent, ModelHandle, ShapeBackend};
use crate::mesh::DecodedMesh;
use crate::services::sampler::SamplingParams;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub cuda_available: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadModelRequest {
    pub name: String,
    pub device: Device,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadModelResponse {
    pub handle: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnloadModelRequest {
    pub handle: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SampleRequest {
    pub model: String,
    pub diffusion: String,
    /// Settings returned by `/v1/configs/{name}` at startup.
    pub diffusion_settings: serde_json::Value,
    pub texts: Vec<String>,
    pub params: SamplingParams,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SampleResponse {
    /// Base64 little-endian f32 bytes, one entry per text.
    pub latents: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecodeRequest {
    pub model: String,
    pub latent: String,
}

/// Backend that forwards every call to an inference sidecar over HTTP.
pub struct RemoteBackend {
    base_url: String,
    client: Client,
}

impl RemoteBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => BackendError::ModelNotFound(body),
            StatusCode::SERVICE_UNAVAILABLE => BackendError::Unavailable(body),
            _ => BackendError::Api(format!("sidecar returned {}: {}", status, body)),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, BackendError> {
        let response = self
            .client
            .traced_get(&self.url(path))
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("{}: {}", path, e)))
    }

    async fn post_json<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .traced_post(&self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl ShapeBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn cuda_available(&self) -> Result<bool, BackendError> {
        let devices: DevicesResponse = self.get_json("devices").await?;
        Ok(devices.cuda_available)
    }

    async fn load_model(&self, name: &str, device: Device) -> Result<ModelHandle, BackendError> {
        tracing::debug!(model = %name, device = %device, "Requesting model load from sidecar");

        let loaded: LoadModelResponse = self
            .post_json(
                "models/load",
                &LoadModelRequest {
                    name: name.to_string(),
                    device,
                },
            )
            .await?;

        Ok(ModelHandle {
            name: name.to_string(),
            id: loaded.handle,
            device,
        })
    }

    async fn unload_model(&self, model: &ModelHandle) -> Result<(), BackendError> {
        let response = self
            .client
            .traced_post(&self.url("models/unload"))
            .json(&UnloadModelRequest {
                handle: model.id.clone(),
            })
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn load_diffusion_config(&self, name: &str) -> Result<DiffusionConfig, BackendError> {
        let settings: serde_json::Value = self.get_json(&format!("configs/{}", name)).await?;
        if !settings.is_object() {
            return Err(BackendError::InvalidResponse(format!(
                "diffusion config {} is not an object",
                name
            )));
        }

        Ok(DiffusionConfig {
            name: name.to_string(),
            settings,
        })
    }

    async fn sample_latents(
        &self,
        model: &ModelHandle,
        diffusion: &DiffusionConfig,
        texts: &[String],
        params: &SamplingParams,
    ) -> Result<Vec<Latent>, BackendError> {
        tracing::debug!(
            model = %model.name,
            batch_size = params.batch_size,
            steps = params.karras_steps,
            "Sending sampling request to sidecar"
        );

        let sampled: SampleResponse = self
            .post_json(
                "sample",
                &SampleRequest {
                    model: model.id.clone(),
                    diffusion: diffusion.name.clone(),
                    diffusion_settings: diffusion.settings.clone(),
                    texts: texts.to_vec(),
                    params: params.clone(),
                },
            )
            .await?;

        sampled
            .latents
            .iter()
            .map(|encoded| Latent::from_base64(encoded))
            .collect()
    }

    async fn decode_mesh(
        &self,
        decoder: &ModelHandle,
        latent: &Latent,
    ) -> Result<DecodedMesh, BackendError> {
        self.post_json(
            "decode",
            &DecodeRequest {
                model: decoder.id.clone(),
                latent: latent.to_base64(),
            },
        )
        .await
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .traced_get(&self.url("health"))
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }
}
