//! Per-session dispatcher: exactly one logical worker per session
//! that processes its bounded queue strictly FIFO, with no preemption.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use super::registry::release_session;
use super::types::{QueuedRequest, Session, SessionStatus};
use crate::container::ContainerRuntime;
use crate::gpu::GpuAllocator;
use crate::stream::{Event, InstanceStreamer};

/// Spawn the dispatcher task for a freshly created session. Returns a handle
/// the caller may ignore; the task runs until the session is killed (either
/// by the reaper, a manual kill, or its own container-level failure).
pub fn spawn(
    session: Arc<Session>,
    streamer: Arc<InstanceStreamer>,
    queue_rx: mpsc::Receiver<QueuedRequest>,
    sessions: Arc<DashMap<Uuid, Arc<Session>>>,
    gpu: Arc<GpuAllocator>,
    runtime: Arc<dyn ContainerRuntime>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run(session, streamer, queue_rx, sessions, gpu, runtime).await;
    })
}

async fn run(
    session: Arc<Session>,
    streamer: Arc<InstanceStreamer>,
    mut queue_rx: mpsc::Receiver<QueuedRequest>,
    sessions: Arc<DashMap<Uuid, Arc<Session>>>,
    gpu: Arc<GpuAllocator>,
    runtime: Arc<dyn ContainerRuntime>,
) {
    loop {
        tokio::select! {
            biased;

            () = session.dispatcher_cancel.cancelled() => {
                drain_with_failure(&mut queue_rx, &session.kill_reason()).await;
                break;
            }

            next = queue_rx.recv() => {
                let Some(request) = next else { break };

                // Caller disconnected before this request was ever dispatched:
                // drop it without touching the container.
                if request.is_cancelled() {
                    continue;
                }

                session.set_status(SessionStatus::Working);
                let healthy = streamer
                    .run_exec(&session.container_id, request.argv, request.timeout, request.sink)
                    .await;

                if !healthy {
                    // exec could not reach the container at all: a
                    // container-level failure, not a task-level one —
                    // kill the session rather than returning it to WAITING.
                    release_session(&sessions, &gpu, runtime.as_ref(), session.session_id, "container_unreachable")
                        .await;
                    break;
                }

                session.set_status(SessionStatus::Waiting);
                session.bump_activity();
            }
        }
    }

    info!(session_id = %session.session_id, "session dispatcher exiting");
}

/// Drain whatever is left in the queue at kill time, failing each
/// not-yet-dispatched request in FIFO order with
/// `TaskFinish{status=failed, error=reason}`.
async fn drain_with_failure(queue_rx: &mut mpsc::Receiver<QueuedRequest>, reason: &str) {
    while let Ok(request) = queue_rx.try_recv() {
        let _ = request.sink.send(Event::finish_failed(reason.to_string())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn drain_fails_every_queued_request_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let (s1, mut r1) = tokio::sync::mpsc::channel(4);
        let (s2, mut r2) = tokio::sync::mpsc::channel(4);
        tx.try_send(QueuedRequest { argv: vec![], timeout: Duration::from_secs(1), sink: s1 }).unwrap();
        tx.try_send(QueuedRequest { argv: vec![], timeout: Duration::from_secs(1), sink: s2 }).unwrap();
        drop(tx);

        drain_with_failure(&mut rx, "idle_timeout").await;

        match r1.recv().await.unwrap() {
            Event::TaskFinish { status, error, .. } => {
                assert_eq!(status, "failed");
                assert_eq!(error.as_deref(), Some("idle_timeout"));
            }
            other => panic!("expected TaskFinish, got {other:?}"),
        }
        assert!(matches!(r2.recv().await.unwrap(), Event::TaskFinish { .. }));
    }

    #[tokio::test]
    async fn cancelled_request_is_detected_before_dispatch() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        drop(rx);
        let request = QueuedRequest { argv: vec![], timeout: Duration::from_secs(1), sink: tx };
        assert!(request.is_cancelled());
    }
}
