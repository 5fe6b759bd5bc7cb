//! Model backend abstractions and implementations.
//!
//! The generative model, the mesh decoder and the diffusion configuration
//! live behind [`ShapeBackend`], so the service can run against a remote
//! inference sidecar or a deterministic mock.

pub mod mock;
pub mod remote;

use crate::mesh::DecodedMesh;
use crate::services::sampler::SamplingParams;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error type for backend operations.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Device not available: {0}")]
    DeviceUnavailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Backend error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Compute device the models are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model loaded by the backend and bound to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    /// Model name as requested (e.g., text300M).
    pub name: String,
    /// Backend-assigned identifier used in later calls.
    pub id: String,
    pub device: Device,
}

/// Diffusion process configuration, opaque to the service.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionConfig {
    pub name: String,
    pub settings: serde_json::Value,
}

/// Latent 3D representation produced by the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct Latent(pub Vec<f32>);

impl Latent {
    /// Base64 of the little-endian `f32` bytes.
    pub fn to_base64(&self) -> String {
        let bytes: Vec<u8> = self.0.iter().flat_map(|v| v.to_le_bytes()).collect();
        STANDARD.encode(bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, BackendError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| BackendError::InvalidResponse(format!("latent is not base64: {}", e)))?;
        if bytes.len() % 4 != 0 {
            return Err(BackendError::InvalidResponse(format!(
                "latent byte length {} is not a multiple of 4",
                bytes.len()
            )));
        }

        Ok(Self(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Trait for text-to-3D model backends.
#[async_trait]
pub trait ShapeBackend: Send + Sync {
    /// Short name used in logs and health output.
    fn name(&self) -> &'static str;

    /// Whether an accelerator is available to the backend.
    async fn cuda_available(&self) -> Result<bool, BackendError>;

    /// Load model weights onto a device.
    async fn load_model(&self, name: &str, device: Device) -> Result<ModelHandle, BackendError>;

    /// Release a loaded model. Called once at shutdown.
    async fn unload_model(&self, model: &ModelHandle) -> Result<(), BackendError>;

    /// Load a named diffusion configuration.
    async fn load_diffusion_config(&self, name: &str) -> Result<DiffusionConfig, BackendError>;

    /// Run diffusion sampling; returns one latent per batch element.
    async fn sample_latents(
        &self,
        model: &ModelHandle,
        diffusion: &DiffusionConfig,
        texts: &[String],
        params: &SamplingParams,
    ) -> Result<Vec<Latent>, BackendError>;

    /// Decode a latent into a triangle mesh with vertex color channels.
    async fn decode_mesh(
        &self,
        decoder: &ModelHandle,
        latent: &Latent,
    ) -> Result<DecodedMesh, BackendError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), BackendError>;
}
