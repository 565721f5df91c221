//! TaskRequestHandler: the pure orchestration of every other component, per
//! request. Resolves the catalog, materializes the model, dispatches by
//! task kind, and hands the caller back a lazy `Event` sequence.
//!
//! Anything that can go wrong before the first event is queued surfaces as
//! a `PipelineError` the HTTP adapter maps to a status code. Anything after
//! that point is folded into the event stream itself as
//! `Connection{failure}` + `TaskFinish{failed}`, since the response is
//! already committed to 200 by then.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::catalog::{CatalogError, ConfigCatalog, Overrides, TaskKind};
use crate::container::{ContainerError, ContainerRuntime, LaunchSpec, MountSpec};
use crate::gpu::{Difficulty, GpuAllocator, LeaseError};
use crate::model::{CacheError, ModelCache};
use crate::session::{FindOrCreateError, QueuedRequest, SessionRegistry, SessionStatus};
use crate::stream::{Event, EventSink, InstanceStreamer};
use crate::telemetry::{RequestSpan, SpanExt};

/// Everything a caller supplies for one task submission.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task_name: String,
    pub overrides: Overrides,
}

/// What the pipeline hands back to the HTTP adapter: a lazy event sequence
/// plus an optional cancellation handle the adapter fires on client
/// disconnect (only meaningful for one-off tasks; session requests are
/// cancelled by closing the sink instead).
pub struct TaskStream {
    pub events: mpsc::Receiver<Event>,
    pub cancel: CancellationToken,
}

/// Failures raised before the stream is considered open. The HTTP adapter
/// maps each variant to a status code.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Model(#[from] CacheError),
    #[error("image {0} is not in the allowed image list")]
    ImageNotAllowed(String),
    #[error("no available GPU of difficulty {0}")]
    CapacityFull(Difficulty),
    #[error("session request queue is full")]
    QueueFull,
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("session {0} is in state {1:?} and cannot accept requests")]
    InvalidSessionState(Uuid, SessionStatus),
    #[error("failed to create container: {0}")]
    Container(#[from] ContainerError),
}

impl From<LeaseError> for PipelineError {
    fn from(e: LeaseError) -> Self {
        PipelineError::CapacityFull(e.difficulty)
    }
}

impl From<FindOrCreateError> for PipelineError {
    fn from(e: FindOrCreateError) -> Self {
        match e {
            FindOrCreateError::SessionNotFound(id) => PipelineError::SessionNotFound(id),
            FindOrCreateError::InvalidSessionState(id, status) => PipelineError::InvalidSessionState(id, status),
            FindOrCreateError::CapacityFull(d) => PipelineError::CapacityFull(d),
            FindOrCreateError::QueueFull => PipelineError::QueueFull,
            FindOrCreateError::ContainerCreate(e) => PipelineError::Container(e),
        }
    }
}

/// Bounded at the event-queue layer, not unboundedly: a slow caller applies
/// backpressure on the producer.
const EVENT_BUFFER: usize = 64;

pub struct Pipeline {
    catalog: Arc<ConfigCatalog>,
    model_cache: Arc<ModelCache>,
    gpu: Arc<GpuAllocator>,
    runtime: Arc<dyn ContainerRuntime>,
    sessions: Arc<SessionRegistry>,
    streamer: Arc<InstanceStreamer>,
    allowed_images: Vec<String>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<ConfigCatalog>,
        model_cache: Arc<ModelCache>,
        gpu: Arc<GpuAllocator>,
        runtime: Arc<dyn ContainerRuntime>,
        sessions: Arc<SessionRegistry>,
        streamer: Arc<InstanceStreamer>,
        allowed_images: Vec<String>,
    ) -> Self {
        Self { catalog, model_cache, gpu, runtime, sessions, streamer, allowed_images }
    }

    fn image_allowed(&self, image: &str) -> bool {
        self.allowed_images.is_empty() || self.allowed_images.iter().any(|a| a == image)
    }

    /// `handle(request) -> TaskStream | PipelineError`.
    ///
    /// Wraps `handle_inner` in a `task_request` span (task name, and the
    /// caller-supplied `session_id` if this is a session reuse request) so
    /// every request's outcome and latency land in the trace the same way
    /// regardless of which branch of the pipeline it took.
    pub async fn handle(&self, request: TaskRequest) -> Result<TaskStream, PipelineError> {
        let session_hint = request.overrides.session_id.map(|id| id.to_string());
        let span = RequestSpan::new(&request.task_name, session_hint.as_deref());
        let start = std::time::Instant::now();

        let result = self.handle_inner(request).instrument(span.clone()).await;

        span.record("latency_ms", start.elapsed().as_millis() as u64);
        span.record_result(&result);
        result
    }

    async fn handle_inner(&self, request: TaskRequest) -> Result<TaskStream, PipelineError> {
        let resolved = self.catalog.resolve(&request.task_name, request.overrides)?;

        if !self.image_allowed(&resolved.action.docker_image) {
            return Err(PipelineError::ImageNotAllowed(resolved.action.docker_image.clone()));
        }

        // `ModelCache.ensure` is skipped entirely when the catalog has no
        // `model_paths` entry for this model_id — the model resides in the
        // worker image itself, or isn't needed at all.
        let model_host_path = match &resolved.model_path {
            Some(_) => Some(self.model_cache.ensure(&resolved.model_id).await?),
            None => None,
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        match resolved.kind {
            TaskKind::Oneoff => {
                let gpu_id = self.gpu.lease(resolved.difficulty)?;
                let cancel = CancellationToken::new();

                let mounts = model_host_path
                    .map(|host_path| vec![MountSpec { host_path, container_path: "/models".to_string() }])
                    .unwrap_or_default();
                let spec = LaunchSpec {
                    image: resolved.action.docker_image.clone(),
                    argv: resolved.action.command.clone(),
                    env: resolved.action.env_vars.clone(),
                    mounts,
                    gpu_id,
                    difficulty: resolved.difficulty,
                };

                let container_id = match self.runtime.create_oneoff(spec).await {
                    Ok(id) => id,
                    Err(e) => {
                        self.gpu.release(gpu_id);
                        return Err(PipelineError::Container(e));
                    }
                };

                let _ = tx.send(Event::connection_allocated(gpu_id, None)).await;
                info!(gpu_id, container_id = %container_id, task_name = %resolved.task_name, "one-off task started");

                let streamer = self.streamer.clone();
                let gpu = self.gpu.clone();
                let timeout = Duration::from_secs(resolved.timeout_seconds as u64);
                let task_cancel = cancel.clone();
                tokio::spawn(async move {
                    streamer.run_oneoff(&container_id, timeout, tx, task_cancel).await;
                    // The container auto-removes itself; the GPU is the
                    // only resource this pipeline must reclaim.
                    gpu.release(gpu_id);
                });

                Ok(TaskStream { events: rx, cancel })
            }

            TaskKind::Session => {
                let request = QueuedRequest {
                    argv: resolved.action.command.clone(),
                    timeout: Duration::from_secs(resolved.timeout_seconds as u64),
                    sink: tx.clone(),
                };

                let (session, reused) = self.sessions.find_or_create(&resolved, model_host_path, request).await?;

                let announce = if reused {
                    Event::connection_session_found(session.session_id)
                } else {
                    Event::connection_allocated(session.gpu_id, Some(session.session_id))
                };
                let _ = tx.send(announce).await;

                // `cancel` is a no-op for session requests: disconnect is
                // handled by the dispatcher observing the sink close.
                Ok(TaskStream { events: rx, cancel: CancellationToken::new() })
            }
        }
    }
}

/// Translate a pre-stream failure into the in-band fallback allowed for
/// call sites that have already committed to a 200 response. Not used by
/// the HTTP adapter's initial dispatch (which maps
/// `PipelineError` straight to a status code) but kept here for any future
/// caller that streams first and resolves lazily.
pub async fn emit_pipeline_failure(sink: &EventSink, err: &PipelineError) {
    let status = match err {
        PipelineError::CapacityFull(_) => "full",
        PipelineError::QueueFull => "queue_full",
        PipelineError::SessionNotFound(_) => "session_not_found",
        PipelineError::InvalidSessionState(..) => "session_not_found",
        _ => "failed",
    };
    if sink.send(Event::connection_failure(status, err.to_string())).await.is_err() {
        warn!("caller gone before pipeline failure could be reported");
        return;
    }
    let _ = sink.send(Event::finish_failed(err.to_string())).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogPaths, Overrides as CatOverrides};
    use crate::container::{FakeContainerRuntime, Script};
    use std::io::Write;

    fn write_catalog(dir: &tempfile::TempDir, kind: &str) -> CatalogPaths {
        let defs = dir.path().join("task_definitions.toml");
        let actions = dir.path().join("task_actions.toml");
        let paths = dir.path().join("model_paths.toml");

        std::fs::File::create(&defs)
            .unwrap()
            .write_all(
                format!(
                    r#"
                    [task_definitions.demo]
                    description = "demo task"
                    task_type = "{kind}"
                    task_difficulty = "low"
                    timeout_seconds = 5
                    model_id = "demo-model"
                    "#
                )
                .as_bytes(),
            )
            .unwrap();

        std::fs::File::create(&actions)
            .unwrap()
            .write_all(
                br#"
                [task_actions.demo-model]
                docker_image = "demo-worker"
                command = ["run"]
                "#,
            )
            .unwrap();

        std::fs::File::create(&paths).unwrap().write_all(b"").unwrap();

        CatalogPaths { task_definitions: defs, task_actions: actions, model_paths: paths }
    }

    fn build_pipeline(kind: &str, dir: &tempfile::TempDir) -> (Pipeline, Arc<FakeContainerRuntime>) {
        let catalog = Arc::new(ConfigCatalog::new(write_catalog(dir, kind), 300, 3600));
        let runtime = Arc::new(FakeContainerRuntime::new(Script {
            lines: vec![r#"{"event":"finish","status":"completed"}"#.to_string()],
            exit_code: 0,
            hang: false,
        }));
        let dyn_runtime: Arc<dyn ContainerRuntime> = runtime.clone() as Arc<dyn ContainerRuntime>;
        let gpu = Arc::new(GpuAllocator::new([(0, Difficulty::Low)]));
        let model_cache = Arc::new(ModelCache::new(
            dir.path().join("models"),
            false,
            Arc::new(crate::model::FakeModelFetcher { fail: false }),
        ));
        let streamer = Arc::new(InstanceStreamer::new(dyn_runtime.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            gpu.clone(),
            dyn_runtime.clone(),
            streamer.clone(),
            5,
            Duration::from_secs(900),
            Duration::from_secs(14_400),
        ));
        let pipeline = Pipeline::new(catalog, model_cache, gpu, dyn_runtime, sessions, streamer, vec![]);
        (pipeline, runtime)
    }

    #[tokio::test]
    async fn oneoff_happy_path_allocates_and_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _runtime) = build_pipeline("oneoff", &dir);

        let mut stream = pipeline
            .handle(TaskRequest { task_name: "demo".to_string(), overrides: CatOverrides::default() })
            .await
            .unwrap();

        let mut saw_allocated = false;
        let mut saw_finish = false;
        while let Some(event) = stream.events.recv().await {
            match event {
                Event::Connection { status, .. } if status == "allocated" => saw_allocated = true,
                Event::TaskFinish { status, .. } if status == "completed" => saw_finish = true,
                _ => {}
            }
        }
        assert!(saw_allocated);
        assert!(saw_finish);

        // GPU must be reclaimed after the stream closes.
        assert!(pipeline.gpu.lease(Difficulty::Low).is_ok());
    }

    #[tokio::test]
    async fn unknown_task_name_is_a_pre_stream_error() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _runtime) = build_pipeline("oneoff", &dir);
        let err = pipeline
            .handle(TaskRequest { task_name: "not-a-task".to_string(), overrides: CatOverrides::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Catalog(CatalogError::UnknownTask(_))));
    }

    #[tokio::test]
    async fn oneoff_capacity_full_surfaces_before_stream_opens() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _runtime) = build_pipeline("oneoff", &dir);
        pipeline.gpu.lease(Difficulty::Low).unwrap();

        let err = pipeline
            .handle(TaskRequest { task_name: "demo".to_string(), overrides: CatOverrides::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CapacityFull(Difficulty::Low)));
    }

    #[tokio::test]
    async fn session_task_creates_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _runtime) = build_pipeline("session", &dir);

        let mut first = pipeline
            .handle(TaskRequest {
                task_name: "demo".to_string(),
                overrides: CatOverrides { create_session: true, ..Default::default() },
            })
            .await
            .unwrap();
        let mut first_session_id = None;
        while let Some(event) = first.events.recv().await {
            if let Event::Connection { status, session_id, .. } = event {
                assert_eq!(status, "allocated");
                first_session_id = session_id;
            }
        }
        assert!(first_session_id.is_some());

        let mut second = pipeline
            .handle(TaskRequest {
                task_name: "demo".to_string(),
                overrides: CatOverrides { create_session: true, ..Default::default() },
            })
            .await
            .unwrap();
        let mut saw_reuse = false;
        while let Some(event) = second.events.recv().await {
            if let Event::Connection { status, session_id, .. } = event {
                assert_eq!(status, "session_found");
                assert_eq!(session_id, first_session_id);
                saw_reuse = true;
            }
        }
        assert!(saw_reuse);
    }

    #[tokio::test]
    async fn image_not_allowed_is_a_pre_stream_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, _runtime) = build_pipeline("oneoff", &dir);
        pipeline.allowed_images = vec!["some-other-image".to_string()];
        let err = pipeline
            .handle(TaskRequest { task_name: "demo".to_string(), overrides: CatOverrides::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageNotAllowed(image) if image == "demo-worker"));
    }
}
