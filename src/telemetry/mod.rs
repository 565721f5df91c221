//! Telemetry for the orchestrator: structured logging, tracing spans, and
//! metrics. No component writes to stdout directly; everything goes through
//! `tracing`.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    init_metrics, record_gpu_lease_attempt, record_model_cache_outcome, record_session_created,
    record_session_killed, record_session_reused, record_task_duration,
};
pub use spans::{RequestSpan, SpanExt};
