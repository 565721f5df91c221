//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from the orchestrator's authoritative
//! env knob set with sensible defaults. Invalid values fall back to
//! defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GPU_DEVICE_IDS` | `0` | Comma-separated GPU device ids |
//! | `GPU_DEVICE_DIFFICULTY` | `low` | Comma-separated difficulty per id, same order |
//! | `SESSION_IDLE_TIMEOUT_SECONDS` | 900 | Idle timeout before a `WAITING` session is reaped |
//! | `SESSION_MAX_LIFETIME_SECONDS` | 14400 | Max lifetime regardless of activity |
//! | `SESSION_QUEUE_MAX_SIZE` | 5 | Bounded per-session request queue size |
//! | `MONITOR_INTERVAL` | 30 | Reaper sweep interval (secs) |
//! | `DEFAULT_TASK_TIMEOUT` | 300 | Default task timeout (secs) when catalog omits one |
//! | `MAX_TASK_TIMEOUT` | 3600 | Upper clamp for any task timeout |
//! | `MODEL_CACHE_DIR` | `./models` | Host directory backing `ModelCache` |
//! | `AUTO_FETCH_MODELS` | true | Whether `ModelCache` may fetch on a miss |
//! | `FILE_SERVICE_URL` | empty | Base URL of the remote model file service |
//! | `FILE_SERVICE_INTERNAL_KEY` | empty | Auth key presented to the file service |
//! | `INTERNAL_API_KEY` | empty | Required `X-API-Key` value for task endpoints |
//! | `ALLOWED_DOCKER_IMAGES` | empty (= unrestricted) | Comma-separated image allowlist |

use std::path::PathBuf;
use std::time::Duration;

use crate::gpu::Difficulty;

/// GPU inventory configuration loaded from env.
#[derive(Debug, Clone)]
pub struct GpuEnvConfig {
    pub devices: Vec<(u32, Difficulty)>,
}

/// Session lifecycle configuration loaded from env.
#[derive(Debug, Clone)]
pub struct SessionEnvConfig {
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub queue_max_size: usize,
    pub monitor_interval: Duration,
}

/// Task timeout configuration loaded from env.
#[derive(Debug, Clone)]
pub struct TaskEnvConfig {
    pub default_timeout_seconds: u32,
    pub max_timeout_seconds: u32,
}

/// Model cache configuration loaded from env.
#[derive(Debug, Clone)]
pub struct ModelCacheEnvConfig {
    pub base_dir: PathBuf,
    pub auto_fetch: bool,
}

/// File service (remote model fetch) configuration loaded from env.
#[derive(Debug, Clone)]
pub struct FileServiceEnvConfig {
    pub base_url: String,
    pub internal_key: String,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub gpu: GpuEnvConfig,
    pub session: SessionEnvConfig,
    pub task: TaskEnvConfig,
    pub model_cache: ModelCacheEnvConfig,
    pub file_service: FileServiceEnvConfig,
    pub internal_api_key: String,
    pub allowed_docker_images: Vec<String>,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `bool` env var, returning `default` on missing or invalid.
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load GPU device inventory from `GPU_DEVICE_IDS` / `GPU_DEVICE_DIFFICULTY`.
///
/// Ids and difficulties are paired by position. A malformed id, an out of
/// range difficulty, or a length mismatch drops that entry rather than
/// failing startup; an allocator with zero devices is valid (every lease
/// fails `Full`).
fn load_gpu_config() -> GpuEnvConfig {
    let ids = parse_csv("GPU_DEVICE_IDS");
    let difficulties = parse_csv("GPU_DEVICE_DIFFICULTY");

    let ids = if ids.is_empty() { vec!["0".to_string()] } else { ids };
    let difficulties = if difficulties.is_empty() { vec!["low".to_string()] } else { difficulties };

    let devices = ids
        .iter()
        .enumerate()
        .filter_map(|(i, raw_id)| {
            let id: u32 = raw_id.parse().ok()?;
            let raw_difficulty = difficulties.get(i).or_else(|| difficulties.first())?;
            let difficulty: Difficulty = raw_difficulty.parse().ok()?;
            Some((id, difficulty))
        })
        .collect();

    GpuEnvConfig { devices }
}

/// Load session lifecycle configuration from environment.
fn load_session_config() -> SessionEnvConfig {
    let idle_secs = parse_u64("SESSION_IDLE_TIMEOUT_SECONDS", 900).max(1);
    let lifetime_secs = parse_u64("SESSION_MAX_LIFETIME_SECONDS", 14_400).max(1);
    let queue_max_size = parse_usize("SESSION_QUEUE_MAX_SIZE", 5);
    let monitor_secs = parse_u64("MONITOR_INTERVAL", 30).max(1);

    SessionEnvConfig {
        idle_timeout: Duration::from_secs(idle_secs),
        max_lifetime: Duration::from_secs(lifetime_secs),
        queue_max_size,
        monitor_interval: Duration::from_secs(monitor_secs),
    }
}

/// Load task timeout configuration from environment.
fn load_task_config() -> TaskEnvConfig {
    let max_timeout = parse_u32("MAX_TASK_TIMEOUT", 3600).max(1);
    let default_timeout = parse_u32("DEFAULT_TASK_TIMEOUT", 300).clamp(1, max_timeout);
    TaskEnvConfig { default_timeout_seconds: default_timeout, max_timeout_seconds: max_timeout }
}

/// Load model cache configuration from environment.
fn load_model_cache_config() -> ModelCacheEnvConfig {
    let base_dir = std::env::var("MODEL_CACHE_DIR").unwrap_or_else(|_| "./models".to_string());
    let auto_fetch = parse_bool("AUTO_FETCH_MODELS", true);
    ModelCacheEnvConfig { base_dir: PathBuf::from(base_dir), auto_fetch }
}

/// Load file service configuration from environment.
fn load_file_service_config() -> FileServiceEnvConfig {
    FileServiceEnvConfig {
        base_url: std::env::var("FILE_SERVICE_URL").unwrap_or_default(),
        internal_key: std::env::var("FILE_SERVICE_INTERNAL_KEY").unwrap_or_default(),
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    EnvConfig {
        gpu: load_gpu_config(),
        session: load_session_config(),
        task: load_task_config(),
        model_cache: load_model_cache_config(),
        file_service: load_file_service_config(),
        internal_api_key: std::env::var("INTERNAL_API_KEY").unwrap_or_default(),
        allowed_docker_images: parse_csv("ALLOWED_DOCKER_IMAGES"),
    }
}

impl EnvConfig {
    /// Whether `image` may be launched, per `ALLOWED_DOCKER_IMAGES`. An empty
    /// allowlist means unrestricted.
    pub fn image_allowed(&self, image: &str) -> bool {
        self.allowed_docker_images.is_empty() || self.allowed_docker_images.iter().any(|a| a == image)
    }
}
