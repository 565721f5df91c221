use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::gpu::Difficulty;

/// A read-only (always) bind mount.
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub container_path: String,
}

/// Everything needed to launch a worker container, already merged with mount
/// discipline: model directory bound at `/models`, `MODEL_PATH=/models`
/// injected, GPU constrained to the leased device.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub image: String,
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub gpu_id: u32,
    pub difficulty: Difficulty,
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("image {image} is not in the allowed image list")]
    ImageNotAllowed { image: String },
    #[error("failed to create container from {image}: {source}")]
    Create { image: String, source: anyhow::Error },
    #[error("container {container_id} not found")]
    NotFound { container_id: String },
    #[error("exec against {container_id} failed: {source}")]
    Exec { container_id: String, source: anyhow::Error },
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(anyhow::Error),
}

/// A single blocking line read from a container's stdout/stderr, tagged by
/// origin so the streamer can pick a default log level.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub line: String,
    pub stderr: bool,
}
