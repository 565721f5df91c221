//! Converts a pipeline `Event` stream into `text/event-stream` frames.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::pipeline::TaskStream;
use crate::shutdown::ShutdownGuard;
use crate::stream::Event;

/// Wraps the pipeline's receiver so dropping the SSE body (axum drops it the
/// moment the client disconnects) fires `cancel` exactly once. This is how a
/// one-off task's container gets stopped on caller disconnect; session
/// requests use a no-op token since the dispatcher detects disconnect by
/// the sink closing instead.
///
/// Also carries the request's `ShutdownGuard`, if any, so the in-flight
/// count a graceful shutdown drains on stays accurate for the whole
/// lifetime of the stream, not just the initial dispatch.
struct CancelOnDrop {
    inner: ReceiverStream<Event>,
    cancel: CancellationToken,
    _guard: Option<ShutdownGuard>,
}

impl Stream for CancelOnDrop {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|maybe| maybe.map(|event| Ok(to_sse(&event))))
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn tag(event: &Event) -> &'static str {
    match event {
        Event::Connection { .. } => "connection",
        Event::Worker { .. } => "worker",
        Event::TextDelta { .. } => "text_delta",
        Event::Text { .. } => "text",
        Event::Logs { .. } => "logs",
        Event::TaskFinish { .. } => "task_finish",
    }
}

fn to_sse(event: &Event) -> SseEvent {
    // `serde_json::to_string` on a type that always serializes cannot fail;
    // an empty object is a harmless fallback that keeps the stream alive.
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().event(tag(event)).data(data)
}

pub fn into_sse_response(
    stream: TaskStream,
    guard: Option<ShutdownGuard>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let wrapped = CancelOnDrop { inner: ReceiverStream::new(stream.events), cancel: stream.cancel, _guard: guard };
    Sse::new(wrapped).keep_alive(KeepAlive::default())
}
