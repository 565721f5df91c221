//! `ModelFetcher` external collaborator: `download(model_id, dest_dir)`.
//! Authentication with the remote file service happens out-of-band via the
//! internal key; this interface never sees it.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching model {model_id}: {source}")]
    Network { model_id: String, source: reqwest::Error },
    #[error("file service rejected request for model {model_id}: status {status}")]
    Authentication { model_id: String, status: reqwest::StatusCode },
    #[error("checksum mismatch for model {model_id}: expected {expected}, got {actual}")]
    ChecksumMismatch { model_id: String, expected: String, actual: String },
    #[error("io error staging model {model_id}: {source}")]
    Io { model_id: String, source: std::io::Error },
}

/// Narrow interface to the remote object-store/file service. `download`
/// writes the model's files under `dest_dir` and returns once the
/// directory is fully populated; it does not rename into place itself —
/// that is `ModelCache`'s job.
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn download(&self, model_id: &str, dest_dir: &Path) -> Result<(), FetchError>;
}

/// `reqwest`-backed fetcher against the file service named by
/// `FILE_SERVICE_URL`, authenticated with `FILE_SERVICE_INTERNAL_KEY`.
pub struct HttpModelFetcher {
    client: reqwest::Client,
    base_url: String,
    internal_key: String,
}

impl HttpModelFetcher {
    pub fn new(base_url: String, internal_key: String) -> Self {
        Self { client: reqwest::Client::new(), base_url, internal_key }
    }
}

#[async_trait]
impl ModelFetcher for HttpModelFetcher {
    async fn download(&self, model_id: &str, dest_dir: &Path) -> Result<(), FetchError> {
        let url = format!("{}/models/{}/download", self.base_url.trim_end_matches('/'), model_id);
        let response = self
            .client
            .get(&url)
            .header("X-Internal-Key", &self.internal_key)
            .send()
            .await
            .map_err(|source| FetchError::Network { model_id: model_id.to_string(), source })?;

        if !response.status().is_success() {
            return Err(FetchError::Authentication { model_id: model_id.to_string(), status: response.status() });
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| FetchError::Io { model_id: model_id.to_string(), source })?;

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Network { model_id: model_id.to_string(), source })?;

        let dest_file = dest_dir.join("model.bin");
        tokio::fs::write(&dest_file, &bytes)
            .await
            .map_err(|source| FetchError::Io { model_id: model_id.to_string(), source })?;

        Ok(())
    }
}

/// In-memory fetcher for tests: writes a marker file and never touches the
/// network.
#[cfg(test)]
pub struct FakeModelFetcher {
    pub fail: bool,
}

#[cfg(test)]
#[async_trait]
impl ModelFetcher for FakeModelFetcher {
    async fn download(&self, model_id: &str, dest_dir: &Path) -> Result<(), FetchError> {
        if self.fail {
            return Err(FetchError::Io {
                model_id: model_id.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "simulated failure"),
            });
        }
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| FetchError::Io { model_id: model_id.to_string(), source })?;
        tokio::fs::write(dest_dir.join("weights.bin"), b"fake")
            .await
            .map_err(|source| FetchError::Io { model_id: model_id.to_string(), source })?;
        Ok(())
    }
}
