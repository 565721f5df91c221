use serde::{Deserialize, Serialize};

/// `model_paths[model_id]`. Lookup for this document never errors:
/// a missing entry simply means no model is associated with the task.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelPath {
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub size_gb: Option<f64>,
}
