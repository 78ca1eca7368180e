//! Health and readiness probe bodies.

use serde::{Deserialize, Serialize};

/// Body of the `/health` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Lifecycle of the relay pipeline as reported to probes.
///
/// `relayer-core` tracks its pipeline state with this type directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::NotStarted => write!(f, "not_started"),
            PipelineStatus::Running => write!(f, "running"),
            PipelineStatus::Draining => write!(f, "draining"),
            PipelineStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Body of the `/alive` and `/ready` endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub ok: bool,
    pub pipeline: PipelineStatus,
}
