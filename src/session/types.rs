use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::stream::EventSink;

/// Session state machine.
///
/// ```text
/// INITIALIZING --container ready--> WAITING
/// WAITING      --request dequeued--> WORKING
/// WORKING      --request complete--> WAITING
/// WORKING      --error|timeout----> KILLED
/// WAITING      --idle|max_life----> KILLED
/// *            --manual kill------> KILLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Waiting,
    Working,
    Killed,
}

/// One request handed to a session's dispatcher.
pub struct QueuedRequest {
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub sink: EventSink,
}

impl QueuedRequest {
    /// A request whose receiving end has already been dropped before it was
    /// dispatched: caller disconnect removes an undispatched request from
    /// the queue.
    pub fn is_cancelled(&self) -> bool {
        self.sink.is_closed()
    }
}

/// A long-lived worker container keeping a model resident across requests.
/// Owned exclusively by `SessionRegistry`; everything else holds only
/// `Arc` references, never exclusive ownership.
pub struct Session {
    pub session_id: Uuid,
    pub gpu_id: u32,
    pub model_id: String,
    pub container_id: String,
    pub created_at: Instant,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub queue_tx: mpsc::Sender<QueuedRequest>,
    pub dispatcher_cancel: CancellationToken,
    status: Mutex<SessionStatus>,
    last_activity: Mutex<Instant>,
    kill_reason: Mutex<Option<String>>,
}

impl Session {
    pub fn new(
        session_id: Uuid,
        gpu_id: u32,
        model_id: String,
        container_id: String,
        idle_timeout: Duration,
        max_lifetime: Duration,
        queue_tx: mpsc::Sender<QueuedRequest>,
    ) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            gpu_id,
            model_id,
            container_id,
            created_at: now,
            idle_timeout,
            max_lifetime,
            queue_tx,
            dispatcher_cancel: CancellationToken::new(),
            status: Mutex::new(SessionStatus::Initializing),
            last_activity: Mutex::new(now),
            kill_reason: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.lock() = status;
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// `last_activity` is monotonic non-decreasing within a session's
    /// lifetime: bumping always moves it to `now`, never
    /// backward, since `Instant::now()` only goes forward.
    pub fn bump_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn mark_for_kill(&self, reason: &str) {
        *self.kill_reason.lock() = Some(reason.to_string());
        self.dispatcher_cancel.cancel();
    }

    pub fn kill_reason(&self) -> String {
        self.kill_reason.lock().clone().unwrap_or_else(|| "killed".to_string())
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }
}

/// Read-only view of a `Session` for HTTP session listing/detail endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub gpu_id: u32,
    pub model_id: String,
    pub container_id: String,
    pub status: SessionStatus,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.session_id,
            gpu_id: s.gpu_id,
            model_id: s.model_id.clone(),
            container_id: s.container_id.clone(),
            status: s.status(),
            age_secs: s.age().as_secs(),
            idle_secs: s.idle_for().as_secs(),
            idle_timeout_secs: s.idle_timeout.as_secs(),
            max_lifetime_secs: s.max_lifetime.as_secs(),
        }
    }
}
