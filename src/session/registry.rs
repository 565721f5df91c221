//! SessionRegistry: owns every `Session`, finds or creates one per
//! request, and enforces the bounded per-session queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};
use uuid::Uuid;

use super::dispatcher;
use super::types::{QueuedRequest, Session, SessionStatus, SessionSummary};
use crate::catalog::ResolvedTask;
use crate::container::{ContainerError, ContainerRuntime, LaunchSpec, MountSpec};
use crate::gpu::{Difficulty, GpuAllocator, LeaseError};
use crate::stream::InstanceStreamer;
use crate::telemetry::{record_session_created, record_session_killed, record_session_reused};

type SessionMap = Arc<DashMap<Uuid, Arc<Session>>>;

#[derive(Debug, Error)]
pub enum FindOrCreateError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("session {0} is in state {1:?} and cannot accept requests")]
    InvalidSessionState(Uuid, SessionStatus),
    #[error("no available GPU of difficulty {0}")]
    CapacityFull(Difficulty),
    #[error("session request queue is full")]
    QueueFull,
    #[error("failed to create session container: {0}")]
    ContainerCreate(#[from] ContainerError),
}

impl From<LeaseError> for FindOrCreateError {
    fn from(e: LeaseError) -> Self {
        FindOrCreateError::CapacityFull(e.difficulty)
    }
}

/// Owns every live `Session`, keyed by `session_id`. The
/// underlying map is shared (via `Arc`) with each session's dispatcher task
/// so a container-level failure can remove and release its own session
/// without routing back through the registry.
pub struct SessionRegistry {
    sessions: SessionMap,
    gpu: Arc<GpuAllocator>,
    runtime: Arc<dyn ContainerRuntime>,
    streamer: Arc<InstanceStreamer>,
    queue_max_size: usize,
    idle_timeout: Duration,
    max_lifetime: Duration,
}

impl SessionRegistry {
    pub fn new(
        gpu: Arc<GpuAllocator>,
        runtime: Arc<dyn ContainerRuntime>,
        streamer: Arc<InstanceStreamer>,
        queue_max_size: usize,
        idle_timeout: Duration,
        max_lifetime: Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            gpu,
            runtime,
            streamer,
            queue_max_size,
            idle_timeout,
            max_lifetime,
        }
    }

    /// `find_or_create(resolved, event_sink) -> (session, reused)`.
    ///
    /// `model_host_path` is `ModelCache.ensure`'s result, already resolved by
    /// the caller (the pipeline owns model materialization; this module only
    /// consumes the resulting host path when launching a fresh container).
    pub async fn find_or_create(
        &self,
        resolved: &ResolvedTask,
        model_host_path: Option<PathBuf>,
        request: QueuedRequest,
    ) -> Result<(Arc<Session>, bool), FindOrCreateError> {
        if let Some(session_id) = resolved.session_id {
            let session = self
                .sessions
                .get(&session_id)
                .map(|e| e.value().clone())
                .ok_or(FindOrCreateError::SessionNotFound(session_id))?;

            let status = session.status();
            if matches!(status, SessionStatus::Killed | SessionStatus::Initializing) {
                return Err(FindOrCreateError::InvalidSessionState(session_id, status));
            }

            self.enqueue(&session, request)?;
            return Ok((session, true));
        }

        if resolved.create_session {
            if let Some(existing) = self.find_waiting_by_model(&resolved.model_id) {
                self.enqueue(&existing, request)?;
                record_session_reused();
                return Ok((existing, true));
            }
        }

        let session = self.create_fresh(resolved, model_host_path).await?;
        self.enqueue(&session, request)?;
        Ok((session, false))
    }

    /// `enqueue(session, request)`: bounded by `SESSION_QUEUE_MAX_SIZE`
    /// (0 rejects every request). Bumps `last_activity`
    /// on success only — a full queue must not move the idle clock.
    pub fn enqueue(&self, session: &Arc<Session>, request: QueuedRequest) -> Result<(), FindOrCreateError> {
        if self.queue_max_size == 0 {
            return Err(FindOrCreateError::QueueFull);
        }
        match session.queue_tx.try_send(request) {
            Ok(()) => {
                session.bump_activity();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(FindOrCreateError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(FindOrCreateError::QueueFull),
        }
    }

    fn find_waiting_by_model(&self, model_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .iter()
            .find(|e| e.value().status() == SessionStatus::Waiting && e.value().model_id == model_id)
            .map(|e| e.value().clone())
    }

    async fn create_fresh(
        &self,
        resolved: &ResolvedTask,
        model_host_path: Option<PathBuf>,
    ) -> Result<Arc<Session>, FindOrCreateError> {
        let gpu_id = self.gpu.lease(resolved.difficulty)?;

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

        let container_id = match self.runtime.create_long_lived(spec).await {
            Ok(id) => id,
            Err(e) => {
                self.gpu.release(gpu_id);
                return Err(FindOrCreateError::ContainerCreate(e));
            }
        };

        let session_id = Uuid::new_v4();
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_max_size.max(1));
        let session = Arc::new(Session::new(
            session_id,
            gpu_id,
            resolved.model_id.clone(),
            container_id,
            self.idle_timeout,
            self.max_lifetime,
            queue_tx,
        ));
        // Container is running and ready before the first request is ever
        // dequeued; the dispatcher never observes INITIALIZING — the state
        // machine transitions INITIALIZING --container ready--> WAITING.
        session.set_status(SessionStatus::Waiting);

        self.sessions.insert(session_id, session.clone());
        record_session_created();
        info!(session_id = %session_id, gpu_id, model_id = %session.model_id, "session created");

        dispatcher::spawn(
            session.clone(),
            self.streamer.clone(),
            queue_rx,
            self.sessions.clone(),
            self.gpu.clone(),
            self.runtime.clone(),
        );

        Ok(session)
    }

    /// `kill(session_id, reason)`: idempotent — removing an id already
    /// absent from the map (already killed) is a no-op.
    pub async fn kill(&self, session_id: Uuid, reason: &str) {
        release_session(&self.sessions, &self.gpu, self.runtime.as_ref(), session_id, reason).await;
    }

    /// Bump `last_activity` without enqueuing a request (`POST
    /// /api/sessions/{id}/keepalive`).
    pub fn keepalive(&self, session_id: Uuid) -> bool {
        match self.sessions.get(&session_id) {
            Some(session) => {
                session.bump_activity();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, session_id: Uuid) -> Option<SessionSummary> {
        self.sessions.get(&session_id).map(|e| SessionSummary::from(e.value().as_ref()))
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions.iter().map(|e| SessionSummary::from(e.value().as_ref())).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// `TimeoutReaper` sweep: collect kill decisions first, then apply
    /// them outside the iteration so the registry is never mutated while
    /// being scanned.
    pub async fn sweep(&self) {
        let mut decisions = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            if session.status() == SessionStatus::Killed {
                continue;
            }
            if session.age() > session.max_lifetime {
                decisions.push((session.session_id, "max_lifetime"));
                continue;
            }
            if session.status() == SessionStatus::Waiting && session.idle_for() > session.idle_timeout {
                decisions.push((session.session_id, "idle_timeout"));
            }
        }
        for (session_id, reason) in decisions {
            self.kill(session_id, reason).await;
        }
    }
}

/// Shared kill/release logic used both by `SessionRegistry::kill` and by a
/// session's own dispatcher on a container-level failure (keeps the
/// session alive on task-level failures and kills only on container-level
/// failures"). Idempotent: returns `false` if `session_id` was already gone.
pub(super) async fn release_session(
    sessions: &SessionMap,
    gpu: &GpuAllocator,
    runtime: &dyn ContainerRuntime,
    session_id: Uuid,
    reason: &str,
) -> bool {
    let Some((_, session)) = sessions.remove(&session_id) else {
        return false;
    };
    session.set_status(SessionStatus::Killed);
    session.mark_for_kill(reason);

    if let Err(e) = runtime.stop(&session.container_id, Duration::from_secs(10)).await {
        warn!(session_id = %session_id, error = %e, "failed to stop session container");
    }
    if let Err(e) = runtime.remove(&session.container_id).await {
        warn!(session_id = %session_id, error = %e, "failed to remove session container");
    }
    gpu.release(session.gpu_id);
    record_session_killed(reason);
    info!(session_id = %session_id, reason, "session killed");
    true
}
