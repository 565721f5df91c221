use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tagged event sequence produced by the streamer and consumed by the HTTP
/// adapter. Exactly one `TaskFinish` closes every stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Connection { status: String, gpu_id: Option<u32>, session_id: Option<Uuid>, message: Option<String> },
    Worker { status: String, container_id: String },
    TextDelta { text: String },
    Text { text: String },
    Logs { level: String, message: String },
    TaskFinish { status: String, elapsed_ms: Option<u64>, error: Option<String> },
}

impl Event {
    pub fn connection_allocated(gpu_id: u32, session_id: Option<Uuid>) -> Self {
        Event::Connection { status: "allocated".to_string(), gpu_id: Some(gpu_id), session_id, message: None }
    }

    pub fn connection_session_found(session_id: Uuid) -> Self {
        Event::Connection {
            status: "session_found".to_string(),
            gpu_id: None,
            session_id: Some(session_id),
            message: None,
        }
    }

    pub fn connection_failure(status: &str, message: impl Into<String>) -> Self {
        Event::Connection { status: status.to_string(), gpu_id: None, session_id: None, message: Some(message.into()) }
    }

    pub fn worker_created(container_id: impl Into<String>) -> Self {
        Event::Worker { status: "created".to_string(), container_id: container_id.into() }
    }

    pub fn logs_info(message: impl Into<String>) -> Self {
        Event::Logs { level: "info".to_string(), message: message.into() }
    }

    pub fn logs_warning(message: impl Into<String>) -> Self {
        Event::Logs { level: "warning".to_string(), message: message.into() }
    }

    pub fn finish_completed(elapsed_ms: u64) -> Self {
        Event::TaskFinish { status: "completed".to_string(), elapsed_ms: Some(elapsed_ms), error: None }
    }

    pub fn finish_timeout(elapsed_ms: u64) -> Self {
        Event::TaskFinish { status: "timeout".to_string(), elapsed_ms: Some(elapsed_ms), error: None }
    }

    pub fn finish_failed(error: impl Into<String>) -> Self {
        Event::TaskFinish { status: "failed".to_string(), elapsed_ms: None, error: Some(error.into()) }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Event::TaskFinish { .. })
    }
}

/// Sender half handed to every component that can emit events for a single
/// request. Bounded so a slow/disconnected caller applies backpressure
/// rather than letting the worker's output buffer unboundedly.
pub type EventSink = tokio::sync::mpsc::Sender<Event>;
