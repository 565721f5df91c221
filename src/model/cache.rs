//! ModelCache: materializes a model directory on the host filesystem and
//! returns its host path, with a per-`model_id` single-flight fetch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::fetcher::{FetchError, ModelFetcher};
use crate::telemetry::record_model_cache_outcome;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("model {0} is not cached and auto-fetch is disabled")]
    NotCached(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Per-`model_id` single-flight coordinator plus a small in-memory resolved
/// path cache. The filesystem, not this struct, is the source of truth for
/// "is it cached".
pub struct ModelCache {
    base_dir: PathBuf,
    auto_fetch: bool,
    fetcher: Arc<dyn ModelFetcher>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    resolved: DashMap<String, PathBuf>,
}

impl ModelCache {
    pub fn new(base_dir: PathBuf, auto_fetch: bool, fetcher: Arc<dyn ModelFetcher>) -> Self {
        Self { base_dir, auto_fetch, fetcher, locks: DashMap::new(), resolved: DashMap::new() }
    }

    /// `ensure(model_id) -> host_path | FetchError`.
    pub async fn ensure(&self, model_id: &str) -> Result<PathBuf, CacheError> {
        if let Some(path) = self.resolved.get(model_id) {
            record_model_cache_outcome(true);
            return Ok(path.clone());
        }

        let target = self.base_dir.join(model_id);
        if is_nonempty_dir(&target).await {
            record_model_cache_outcome(true);
            self.resolved.insert(model_id.to_string(), target.clone());
            return Ok(target);
        }

        if !self.auto_fetch {
            record_model_cache_outcome(false);
            return Err(CacheError::NotCached(model_id.to_string()));
        }

        let key_lock = self
            .locks
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = key_lock.lock().await;

        // Re-check under the per-key lock: another caller may have just
        // finished the fetch we were about to start.
        if is_nonempty_dir(&target).await {
            record_model_cache_outcome(true);
            self.resolved.insert(model_id.to_string(), target.clone());
            return Ok(target);
        }

        record_model_cache_outcome(false);
        self.fetch_into(model_id, &target).await?;
        self.resolved.insert(model_id.to_string(), target.clone());
        Ok(target)
    }

    async fn fetch_into(&self, model_id: &str, target: &Path) -> Result<(), FetchError> {
        let staging = self.base_dir.join(format!(".staging-{model_id}-{}", uuid::Uuid::new_v4()));

        let result = self.fetcher.download(model_id, &staging).await;
        match result {
            Ok(()) => match tokio::fs::rename(&staging, target).await {
                Ok(()) => {
                    info!(model_id, path = %target.display(), "model fetch complete");
                    Ok(())
                }
                Err(source) => {
                    let _ = tokio::fs::remove_dir_all(&staging).await;
                    Err(FetchError::Io { model_id: model_id.to_string(), source })
                }
            },
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                warn!(model_id, error = %e, "model fetch failed");
                Err(e)
            }
        }
    }
}

async fn is_nonempty_dir(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}
