//! SessionRegistry + TimeoutReaper: long-lived worker
//! containers that keep a model resident across many requests, dispatched
//! through a bounded per-session queue and reaped by a dual-timeout
//! watchdog.

mod dispatcher;
mod reaper;
mod registry;
mod types;

pub use reaper::spawn as spawn_reaper;
pub use registry::{FindOrCreateError, SessionRegistry};
pub use types::{QueuedRequest, Session, SessionStatus, SessionSummary};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ResolvedTask, TaskAction, TaskKind};
    use crate::container::{FakeContainerRuntime, Script};
    use crate::gpu::{Difficulty, GpuAllocator};
    use crate::stream::{Event, InstanceStreamer};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn resolved(model_id: &str, difficulty: Difficulty) -> ResolvedTask {
        ResolvedTask {
            task_name: "chat-session".to_string(),
            kind: TaskKind::Session,
            difficulty,
            timeout_seconds: 30,
            metadata: HashMap::new(),
            model_id: model_id.to_string(),
            model_path: None,
            action: TaskAction {
                docker_image: "session-worker".to_string(),
                command: vec!["serve".to_string()],
                env_vars: HashMap::new(),
                build_args: HashMap::new(),
            },
            session_id: None,
            create_session: true,
        }
    }

    fn registry(queue_max: usize) -> (Arc<SessionRegistry>, Arc<FakeContainerRuntime>) {
        let runtime = Arc::new(FakeContainerRuntime::new(Script {
            lines: vec![r#"{"event":"finish","status":"completed"}"#.to_string()],
            exit_code: 0,
            hang: false,
        }));
        let gpu = Arc::new(GpuAllocator::new([(0, Difficulty::Low), (1, Difficulty::High)]));
        let streamer = Arc::new(InstanceStreamer::new(runtime.clone() as Arc<dyn crate::container::ContainerRuntime>));
        let registry = Arc::new(SessionRegistry::new(
            gpu,
            runtime.clone() as Arc<dyn crate::container::ContainerRuntime>,
            streamer,
            queue_max,
            Duration::from_secs(900),
            Duration::from_secs(14_400),
        ));
        (registry, runtime)
    }

    #[tokio::test]
    async fn fresh_session_then_reuse_by_model() {
        let (registry, _runtime) = registry(5);
        let task = resolved("llama-7b", Difficulty::Low);

        let (tx1, _rx1) = tokio::sync::mpsc::channel(16);
        let request1 = QueuedRequest { argv: vec!["run".into()], timeout: Duration::from_secs(5), sink: tx1 };
        let (session1, reused1) = registry.find_or_create(&task, None, request1).await.unwrap();
        assert!(!reused1);
        session1.set_status(SessionStatus::Waiting);

        let (tx2, _rx2) = tokio::sync::mpsc::channel(16);
        let request2 = QueuedRequest { argv: vec!["run".into()], timeout: Duration::from_secs(5), sink: tx2 };
        let (session2, reused2) = registry.find_or_create(&task, None, request2).await.unwrap();
        assert!(reused2);
        assert_eq!(session1.session_id, session2.session_id);
    }

    #[tokio::test]
    async fn explicit_session_id_not_found_errors() {
        let (registry, _runtime) = registry(5);
        let mut task = resolved("llama-7b", Difficulty::Low);
        task.session_id = Some(uuid::Uuid::new_v4());
        task.create_session = false;

        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let request = QueuedRequest { argv: vec![], timeout: Duration::from_secs(5), sink: tx };
        let err = registry.find_or_create(&task, None, request).await.unwrap_err();
        assert!(matches!(err, FindOrCreateError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn zero_size_queue_rejects_every_request() {
        let (registry, _runtime) = registry(0);
        let task = resolved("llama-7b", Difficulty::Low);
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let request = QueuedRequest { argv: vec![], timeout: Duration::from_secs(5), sink: tx };
        let err = registry.find_or_create(&task, None, request).await.unwrap_err();
        assert!(matches!(err, FindOrCreateError::QueueFull));
    }

    #[tokio::test]
    async fn kill_releases_gpu_and_is_idempotent() {
        let (registry, _runtime) = registry(5);
        let task = resolved("llama-7b", Difficulty::Low);
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let request = QueuedRequest { argv: vec![], timeout: Duration::from_secs(5), sink: tx };
        let (session, _) = registry.find_or_create(&task, None, request).await.unwrap();
        let gpu_id = session.gpu_id;

        registry.kill(session.session_id, "manual").await;
        assert!(registry.get(session.session_id).is_none());

        // Second kill is a no-op, not a panic or double-release.
        registry.kill(session.session_id, "manual").await;

        // GPU is available again for a brand-new session.
        let task2 = resolved("other-model", Difficulty::Low);
        let (tx2, _rx2) = tokio::sync::mpsc::channel(16);
        let request2 = QueuedRequest { argv: vec![], timeout: Duration::from_secs(5), sink: tx2 };
        let (session2, _) = registry.find_or_create(&task2, None, request2).await.unwrap();
        assert_eq!(session2.gpu_id, gpu_id);
    }

    #[tokio::test]
    async fn session_request_completes_and_returns_to_waiting() {
        let (registry, _runtime) = registry(5);
        let task = resolved("llama-7b", Difficulty::Low);
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let request = QueuedRequest { argv: vec!["run".into()], timeout: Duration::from_secs(5), sink: tx };
        let (session, _) = registry.find_or_create(&task, None, request).await.unwrap();

        let mut saw_completed_finish = false;
        while let Some(event) = rx.recv().await {
            if let Event::TaskFinish { status, .. } = event {
                saw_completed_finish = status == "completed";
            }
        }
        assert!(saw_completed_finish);

        // Dispatcher returns the session to WAITING after a successful task,
        // so it is eligible for reuse by a later request.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.status(), SessionStatus::Waiting);
    }
}
