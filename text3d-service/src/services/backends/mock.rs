//! Mock backend for development and testing.
//!
//! Latents are derived deterministically from the prompt and decode into a
//! UV sphere whose size and colors depend on the latent, so different
//! prompts yield different files.

use super::{BackendError, Device, DiffusionConfig, Latent, ModelHandle, ShapeBackend};
use crate::mesh::{DecodedMesh, BLUE_CHANNEL, GREEN_CHANNEL, RED_CHANNEL};
use crate::services::sampler::SamplingParams;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const KNOWN_MODELS: &[&str] = &["transmitter", "text300M", "image300M"];
const LATENT_LEN: usize = 16;

/// Mock text-to-3D backend.
pub struct MockBackend {
    cuda: bool,
    fail_sampling: bool,
    fail_decoding: bool,
    uniform_colors: bool,
    sample_delay: Duration,
    rings: u32,
    segments: u32,
    sample_calls: AtomicUsize,
    decode_calls: AtomicUsize,
    loaded: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            cuda: false,
            fail_sampling: false,
            fail_decoding: false,
            uniform_colors: false,
            sample_delay: Duration::ZERO,
            rings: 8,
            segments: 12,
            sample_calls: AtomicUsize::new(0),
            decode_calls: AtomicUsize::new(0),
            loaded: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_cuda(mut self, available: bool) -> Self {
        self.cuda = available;
        self
    }

    pub fn failing_sampler(mut self) -> Self {
        self.fail_sampling = true;
        self
    }

    pub fn failing_decoder(mut self) -> Self {
        self.fail_decoding = true;
        self
    }

    /// Decode every latent with identical channel values.
    pub fn uniform_colors(mut self) -> Self {
        self.uniform_colors = true;
        self
    }

    /// Simulate slow diffusion sampling.
    pub fn with_sample_delay(mut self, delay: Duration) -> Self {
        self.sample_delay = delay;
        self
    }

    pub fn sample_calls(&self) -> usize {
        self.sample_calls.load(Ordering::SeqCst)
    }

    pub fn decode_calls(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }

    pub fn loaded_models(&self) -> usize {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Highest number of samplings that ran at the same time.
    pub fn max_concurrent_samples(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn latent_for(text: &str) -> Latent {
        // FNV-1a seed, xorshift stream
        let mut state = text.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        });
        if state == 0 {
            state = 0x9e37_79b9_7f4a_7c15;
        }

        Latent(
            (0..LATENT_LEN)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    (state >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0
                })
                .collect(),
        )
    }

    fn sphere(&self, latent: &Latent) -> DecodedMesh {
        let at = |i: usize| latent.0.get(i).copied().unwrap_or(0.0);
        let radius = 0.5 + 0.25 * at(0).abs();
        let (rings, segments) = (self.rings, self.segments);

        let mut verts = Vec::new();
        let mut red = Vec::new();
        let mut green = Vec::new();
        let mut blue = Vec::new();

        for ring in 0..=rings {
            let theta = PI * ring as f32 / rings as f32;
            for segment in 0..=segments {
                let phi = 2.0 * PI * segment as f32 / segments as f32;
                let (x, y, z) = (theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                verts.push([x * radius, y * radius, z * radius]);

                if self.uniform_colors {
                    red.push(0.5);
                    green.push(0.5);
                    blue.push(0.5);
                } else {
                    red.push(0.5 + 0.5 * (x * 2.0 + at(1) * PI).sin());
                    green.push(0.5 + 0.5 * (y * 2.0 + at(2) * PI).sin());
                    blue.push(0.5 + 0.5 * (z * 2.0 + at(3) * PI).sin());
                }
            }
        }

        let mut faces = Vec::new();
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * (segments + 1) + segment;
                let b = a + segments + 1;
                faces.push([a, b, a + 1]);
                faces.push([a + 1, b, b + 1]);
            }
        }

        DecodedMesh {
            verts,
            faces,
            vertex_channels: HashMap::from([
                (RED_CHANNEL.to_string(), red),
                (GREEN_CHANNEL.to_string(), green),
                (BLUE_CHANNEL.to_string(), blue),
            ]),
        }
    }
}

#[async_trait]
impl ShapeBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn cuda_available(&self) -> Result<bool, BackendError> {
        Ok(self.cuda)
    }

    async fn load_model(&self, name: &str, device: Device) -> Result<ModelHandle, BackendError> {
        if !KNOWN_MODELS.contains(&name) {
            return Err(BackendError::ModelNotFound(name.to_string()));
        }
        if device == Device::Cuda && !self.cuda {
            return Err(BackendError::DeviceUnavailable("cuda".to_string()));
        }

        self.loaded.fetch_add(1, Ordering::SeqCst);
        Ok(ModelHandle {
            name: name.to_string(),
            id: format!("mock-{}", name),
            device,
        })
    }

    async fn unload_model(&self, _model: &ModelHandle) -> Result<(), BackendError> {
        self.loaded.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_diffusion_config(&self, name: &str) -> Result<DiffusionConfig, BackendError> {
        Ok(DiffusionConfig {
            name: name.to_string(),
            settings: json!({
                "schedule": "exp",
                "timesteps": 1024,
                "mean_type": "x_start",
            }),
        })
    }

    async fn sample_latents(
        &self,
        _model: &ModelHandle,
        _diffusion: &DiffusionConfig,
        texts: &[String],
        _params: &SamplingParams,
    ) -> Result<Vec<Latent>, BackendError> {
        self.sample_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sampling {
            return Err(BackendError::Api("mock sampler failure".to_string()));
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.sample_delay.is_zero() {
            tokio::time::sleep(self.sample_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(texts.iter().map(|text| Self::latent_for(text)).collect())
    }

    async fn decode_mesh(
        &self,
        _decoder: &ModelHandle,
        latent: &Latent,
    ) -> Result<DecodedMesh, BackendError> {
        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_decoding {
            return Err(BackendError::Api("mock decoder failure".to_string()));
        }
        Ok(self.sphere(latent))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
