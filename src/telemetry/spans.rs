//! Span utilities and extension traits for orchestrator tracing.
//!
//! Provides standardized span creation and result recording.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for creating standardized task-request spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Create a new request span with standard fields.
    ///
    /// Fields included:
    /// - `task_name`: Catalog task name requested
    /// - `session_id`: Session the request was routed to, if any
    /// - `status`: To be filled in by `SpanExt::record_result`
    /// - `error.message`: To be filled in on error
    /// - `latency_ms`: To be filled in after completion
    pub fn new(task_name: &str, session_id: Option<&str>) -> Span {
        info_span!(
            "task_request",
            task_name = %task_name,
            session_id = session_id.unwrap_or("none"),
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
