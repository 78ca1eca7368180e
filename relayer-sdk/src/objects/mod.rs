pub mod health;
pub mod reward;

pub use health::{HealthResponse, PipelineStatus, ProbeResponse};
pub use reward::{RewardGranted, RewardView};
