//! ConfigCatalog: three TOML documents keyed by name, merged into a
//! `ResolvedTask` on demand. Re-reads the documents on every `resolve` call;
//! there is no cache to invalidate.

mod model;
mod types;

pub use model::ModelPath;
pub use types::{Overrides, ResolvedTask, TaskAction, TaskDefinition, TaskKind};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::gpu::Difficulty;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("no task_action registered for model {0}")]
    MissingAction(String),
    #[error("invalid difficulty override: {0}")]
    InvalidDifficulty(String),
    #[error("failed to read catalog file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse catalog file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

#[derive(Debug, Deserialize, Default)]
struct TaskDefinitionsDoc {
    #[serde(default)]
    task_definitions: HashMap<String, TaskDefinition>,
}

#[derive(Debug, Deserialize, Default)]
struct TaskActionsDoc {
    #[serde(default)]
    task_actions: HashMap<String, TaskAction>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelPathsDoc {
    #[serde(default)]
    model_paths: HashMap<String, ModelPath>,
}

/// Locations of the three catalog documents on disk.
#[derive(Debug, Clone)]
pub struct CatalogPaths {
    pub task_definitions: PathBuf,
    pub task_actions: PathBuf,
    pub model_paths: PathBuf,
}

/// Pure, stateless resolver over the three catalog documents.
pub struct ConfigCatalog {
    paths: CatalogPaths,
    default_task_timeout: u32,
    max_task_timeout: u32,
}

impl ConfigCatalog {
    pub fn new(paths: CatalogPaths, default_task_timeout: u32, max_task_timeout: u32) -> Self {
        Self { paths, default_task_timeout: default_task_timeout.min(max_task_timeout), max_task_timeout }
    }

    /// `resolve(task_name, overrides) -> ResolvedTask`.
    ///
    /// Lookup order: `task_definitions[name]` -> `model_id` ->
    /// `task_actions[model_id]` -> `model_paths[model_id]?`.
    pub fn resolve(&self, task_name: &str, overrides: Overrides) -> Result<ResolvedTask, CatalogError> {
        let definitions = load(&self.paths.task_definitions, |d: TaskDefinitionsDoc| d.task_definitions)?;
        let def = definitions
            .get(task_name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownTask(task_name.to_string()))?;

        let actions = load(&self.paths.task_actions, |d: TaskActionsDoc| d.task_actions)?;
        let action = actions
            .get(&def.model_id)
            .cloned()
            .ok_or_else(|| CatalogError::MissingAction(def.model_id.clone()))?;

        let model_path = load(&self.paths.model_paths, |d: ModelPathsDoc| d.model_paths)
            .map(|paths| paths.get(&def.model_id).cloned())
            .unwrap_or_else(|e| {
                warn!(error = %e, "model_paths document unreadable, proceeding with no model path");
                None
            });

        let difficulty = match &overrides.difficulty {
            Some(raw) => raw
                .parse::<Difficulty>()
                .map_err(CatalogError::InvalidDifficulty)?,
            None => def.task_difficulty,
        };

        let timeout_seconds = overrides
            .timeout_seconds
            .or(def.timeout_seconds)
            .unwrap_or(self.default_task_timeout)
            .clamp(1, self.max_task_timeout);

        let mut metadata = def.metadata.clone();
        if let Some(over) = overrides.metadata {
            metadata.extend(over);
        }

        Ok(ResolvedTask {
            task_name: task_name.to_string(),
            kind: def.task_type,
            difficulty,
            timeout_seconds,
            metadata,
            model_id: def.model_id,
            model_path,
            action,
            session_id: overrides.session_id,
            create_session: overrides.create_session,
        })
    }
}

fn load<D, T>(path: &Path, project: impl FnOnce(D) -> HashMap<String, T>) -> Result<HashMap<String, T>, CatalogError>
where
    D: for<'de> Deserialize<'de> + Default,
{
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(CatalogError::Io { path: path.to_path_buf(), source: e }),
    };
    let doc: D = toml::from_str(&text).map_err(|e| CatalogError::Parse { path: path.to_path_buf(), source: e })?;
    Ok(project(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_catalog(dir: &tempfile::TempDir) -> CatalogPaths {
        let defs = dir.path().join("task_definitions.toml");
        let actions = dir.path().join("task_actions.toml");
        let paths = dir.path().join("model_paths.toml");

        std::fs::File::create(&defs)
            .unwrap()
            .write_all(
                br#"
                [task_definitions.loading-test]
                description = "smoke test task"
                task_type = "oneoff"
                task_difficulty = "low"
                timeout_seconds = 30
                model_id = "test-loading"
                "#,
            )
            .unwrap();

        std::fs::File::create(&actions)
            .unwrap()
            .write_all(
                br#"
                [task_actions.test-loading]
                docker_image = "loading-worker"
                command = ["run"]
                "#,
            )
            .unwrap();

        std::fs::File::create(&paths)
            .unwrap()
            .write_all(
                br#"
                [model_paths.test-loading]
                path = "/data/models/test-loading"
                "#,
            )
            .unwrap();

        CatalogPaths { task_definitions: defs, task_actions: actions, model_paths: paths }
    }

    #[test]
    fn resolves_full_chain() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ConfigCatalog::new(write_catalog(&dir), 300, 3600);
        let resolved = catalog.resolve("loading-test", Overrides::default()).unwrap();
        assert_eq!(resolved.model_id, "test-loading");
        assert_eq!(resolved.action.docker_image, "loading-worker");
        assert!(resolved.model_path.is_some());
    }

    #[test]
    fn unknown_task_name_errors() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ConfigCatalog::new(write_catalog(&dir), 300, 3600);
        let err = catalog.resolve("nonexistent", Overrides::default()).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTask(_)));
    }

    #[test]
    fn timeout_override_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ConfigCatalog::new(write_catalog(&dir), 60, 60);
        let overrides = Overrides { timeout_seconds: Some(99_999), ..Default::default() };
        let resolved = catalog.resolve("loading-test", overrides).unwrap();
        assert_eq!(resolved.timeout_seconds, 60);
    }

    #[test]
    fn missing_model_path_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_catalog(&dir);
        std::fs::write(&paths.model_paths, "").unwrap();
        let catalog = ConfigCatalog::new(paths, 300, 3600);
        let resolved = catalog.resolve("loading-test", Overrides::default()).unwrap();
        assert!(resolved.model_path.is_none());
    }

    #[test]
    fn omitted_catalog_timeout_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let defs = dir.path().join("task_definitions.toml");
        std::fs::write(
            &defs,
            br#"
            [task_definitions.no-timeout]
            task_type = "oneoff"
            task_difficulty = "low"
            model_id = "test-loading"
            "#,
        )
        .unwrap();
        let mut paths = write_catalog(&dir);
        paths.task_definitions = defs;

        let catalog = ConfigCatalog::new(paths, 42, 3600);
        let resolved = catalog.resolve("no-timeout", Overrides::default()).unwrap();
        assert_eq!(resolved.timeout_seconds, 42);
    }
}
