pub mod backends;
pub mod generation;
pub mod metrics;
pub mod models;
pub mod sampler;

pub use backends::{mock::MockBackend, remote::RemoteBackend, BackendError, Device, ShapeBackend};
pub use generation::Generator;
pub use metrics::{get_metrics, init_metrics};
pub use models::{ModelContext, ModelNames};
pub use sampler::{sample_latents, SamplingParams};
