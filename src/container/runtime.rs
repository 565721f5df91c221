use std::time::Duration;

use async_trait::async_trait;

use super::types::{ContainerError, LaunchSpec, RawLine};

/// A lazy, blocking sequence of raw log lines. The `next()` call on the
/// underlying iterator blocks the calling thread until a line is available
/// or the stream ends. Callers
/// must never drive this on the async scheduler's worker threads directly;
/// see `crate::stream` for the bridge into an async stream.
pub type LogLines = Box<dyn Iterator<Item = std::io::Result<RawLine>> + Send>;

/// Handle to a running `exec`: a blocking stdout line source plus a future
/// that resolves to the exit code once the command completes.
pub struct ExecHandle {
    pub stdout: LogLines,
    pub exit_code: tokio::sync::oneshot::Receiver<i64>,
}

/// The capabilities the orchestrator requires from a container runtime.
/// Implementations talk to a Docker-compatible daemon as a sibling process
/// (DOOD), never by nesting a runtime inside this one.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_oneoff(&self, spec: LaunchSpec) -> Result<String, ContainerError>;
    async fn create_long_lived(&self, spec: LaunchSpec) -> Result<String, ContainerError>;
    async fn exec(&self, container_id: &str, argv: Vec<String>) -> Result<ExecHandle, ContainerError>;
    fn stream_logs(&self, container_id: &str, follow: bool) -> Result<LogLines, ContainerError>;
    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<(), ContainerError>;
    async fn remove(&self, container_id: &str) -> Result<(), ContainerError>;
}
