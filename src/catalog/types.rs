use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::model::ModelPath;
use crate::gpu::Difficulty;

/// `task_definitions[name]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub description: String,
    pub task_type: TaskKind,
    pub task_difficulty: Difficulty,
    /// Omitted in the catalog falls back to `DEFAULT_TASK_TIMEOUT`
    /// (`ConfigCatalog::resolve`), not a hardcoded constant here.
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub model_id: String,
}

/// Whether a task owns a long-lived session or runs as a one-off container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Session,
    Oneoff,
}

/// `task_actions[model_id]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskAction {
    pub docker_image: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub build_args: HashMap<String, String>,
}

/// Per-request overrides accepted alongside `task_name`.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub difficulty: Option<String>,
    pub timeout_seconds: Option<u32>,
    pub metadata: Option<HashMap<String, String>>,
    pub session_id: Option<uuid::Uuid>,
    pub create_session: bool,
}

/// Merge of `TaskDefinition` + `TaskAction` + `ModelPath` + request overrides.
/// Self-contained; consumed once by the pipeline.
#[derive(Debug, Clone)]
pub struct ResolvedTask {
    pub task_name: String,
    pub kind: TaskKind,
    pub difficulty: Difficulty,
    pub timeout_seconds: u32,
    pub metadata: HashMap<String, String>,
    pub model_id: String,
    pub model_path: Option<ModelPath>,
    pub action: TaskAction,
    pub session_id: Option<uuid::Uuid>,
    pub create_session: bool,
}
