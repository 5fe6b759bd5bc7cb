use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Generation runs one request at a time unless configured otherwise.
const DEFAULT_MAX_CONCURRENT_GENERATIONS: usize = 1;

/// Sampling at 256 Karras steps on CPU can take many minutes.
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Clone, Deserialize)]
pub struct Text3dConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub models: ModelConfig,
    pub output: OutputConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub backend: BackendKind,
    /// Base URL of the inference sidecar (remote backend only)
    pub backend_url: String,
    /// HTTP timeout for a single sidecar call
    pub backend_timeout_secs: u64,
    pub device: DevicePreference,
    /// Latent-to-mesh decoder (e.g., transmitter)
    pub decoder: String,
    /// Text-conditioned latent generator (e.g., text300M)
    pub generator: String,
    /// Diffusion configuration name (e.g., diffusion)
    pub diffusion_config: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub max_concurrent: usize,
    /// Zero disables the timeout.
    pub timeout_secs: u64,
}

impl GenerationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Mock,
    Remote,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    Auto,
    Cuda,
    Cpu,
}

impl Text3dConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let max_concurrent: usize = parse_env(
            "GENERATION_MAX_CONCURRENT",
            &DEFAULT_MAX_CONCURRENT_GENERATIONS.to_string(),
            is_prod,
        )?;
        if max_concurrent == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "GENERATION_MAX_CONCURRENT must be at least 1"
            )));
        }

        Ok(Text3dConfig {
            common: common_config,
            models: ModelConfig {
                backend: get_env("MODEL_BACKEND", Some("mock"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                backend_url: get_env("MODEL_BACKEND_URL", Some("http://localhost:8500"), is_prod)?,
                backend_timeout_secs: parse_env(
                    "MODEL_BACKEND_TIMEOUT_SECS",
                    &DEFAULT_BACKEND_TIMEOUT_SECS.to_string(),
                    is_prod,
                )?,
                device: get_env("MODEL_DEVICE", Some("auto"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                decoder: get_env("MODEL_DECODER", Some("transmitter"), is_prod)?,
                generator: get_env("MODEL_GENERATOR", Some("text300M"), is_prod)?,
                diffusion_config: get_env("MODEL_DIFFUSION_CONFIG", Some("diffusion"), is_prod)?,
            },
            output: OutputConfig {
                dir: PathBuf::from(get_env("OUTPUT_DIR", Some("generated"), is_prod)?),
            },
            generation: GenerationConfig {
                max_concurrent,
                timeout_secs: parse_env("GENERATION_TIMEOUT_SECS", "0", is_prod)?,
            },
        })
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(BackendKind::Mock),
            "remote" => Ok(BackendKind::Remote),
            _ => Err(format!("Invalid model backend: {}", s)),
        }
    }
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "cpu" => Ok(DevicePreference::Cpu),
            _ => Err(format!("Invalid model device: {}", s)),
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}
