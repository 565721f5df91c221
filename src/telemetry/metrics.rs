//! `metrics` crate facade: named counters/histograms recorded at the call
//! sites that matter for operating the orchestrator.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install the process-wide metrics recorder. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        metrics::describe_counter!("gpu_lease_attempts_total", "GPU lease attempts by difficulty");
        metrics::describe_counter!("gpu_lease_failures_total", "GPU lease refusals by difficulty");
        metrics::describe_counter!("model_cache_hits_total", "ModelCache hits");
        metrics::describe_counter!("model_cache_fetches_total", "ModelCache single-flight fetches triggered");
        metrics::describe_counter!("session_created_total", "Sessions created");
        metrics::describe_counter!("session_reused_total", "Sessions reused for a new request");
        metrics::describe_counter!("session_killed_total", "Sessions killed, by reason");
        metrics::describe_histogram!("task_duration_seconds", "End-to-end task duration");
    });
}

pub fn record_gpu_lease_attempt(difficulty: &str, ok: bool) {
    metrics::counter!("gpu_lease_attempts_total", "difficulty" => difficulty.to_string()).increment(1);
    if !ok {
        metrics::counter!("gpu_lease_failures_total", "difficulty" => difficulty.to_string()).increment(1);
    }
}

pub fn record_model_cache_outcome(hit: bool) {
    if hit {
        metrics::counter!("model_cache_hits_total").increment(1);
    } else {
        metrics::counter!("model_cache_fetches_total").increment(1);
    }
}

pub fn record_session_created() {
    metrics::counter!("session_created_total").increment(1);
}

pub fn record_session_reused() {
    metrics::counter!("session_reused_total").increment(1);
}

pub fn record_session_killed(reason: &str) {
    metrics::counter!("session_killed_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_task_duration(seconds: f64) {
    metrics::histogram!("task_duration_seconds").record(seconds);
}
