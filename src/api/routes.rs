//! HTTP handlers for the task submission and session admin surface.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use super::sse::into_sse_response;
use crate::catalog::Overrides;
use crate::pipeline::TaskRequest;
use crate::AppState;

/// `POST /api/tasks/predefined` body.
#[derive(Debug, Deserialize)]
pub struct SubmitTaskBody {
    pub task_name: String,
    pub task_difficulty: Option<String>,
    pub timeout_seconds: Option<u32>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub create_session: bool,
}

pub async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<SubmitTaskBody>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    // Refuse new work once draining has started; requests already
    // streaming are tracked by the guard below and let to finish.
    let guard = state.shutdown.track().ok_or(ApiError::ShuttingDown)?;

    let overrides = Overrides {
        difficulty: body.task_difficulty,
        timeout_seconds: body.timeout_seconds,
        metadata: body.metadata,
        session_id: body.session_id,
        create_session: body.create_session,
    };

    let stream = state.pipeline.handle(TaskRequest { task_name: body.task_name, overrides }).await?;
    Ok(into_sse_response(stream, Some(guard)))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<crate::session::SessionSummary>> {
    Json(state.sessions.list())
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<crate::session::SessionSummary>, ApiError> {
    state
        .sessions
        .get(session_id)
        .map(Json)
        .ok_or(ApiError::Pipeline(crate::pipeline::PipelineError::SessionNotFound(session_id)))
}

#[derive(Debug, Serialize)]
pub struct KillResponse {
    pub killed: bool,
}

pub async fn kill_session(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> Json<KillResponse> {
    let existed = state.sessions.get(session_id).is_some();
    state.sessions.kill(session_id, "manual").await;
    Json(KillResponse { killed: existed })
}

#[derive(Debug, Serialize)]
pub struct KeepaliveResponse {
    pub ok: bool,
}

pub async fn keepalive_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<KeepaliveResponse>, ApiError> {
    if state.sessions.keepalive(session_id) {
        Ok(Json(KeepaliveResponse { ok: true }))
    } else {
        Err(ApiError::Pipeline(crate::pipeline::PipelineError::SessionNotFound(session_id)))
    }
}

pub async fn health(State(state): State<AppState>) -> Json<crate::health::HealthReport> {
    let shutdown_state = state.shutdown.state().await;
    let report = state.health.report(
        shutdown_state,
        state.gpu.snapshot(),
        state.sessions.session_count(),
        state.shutdown.in_flight_count() as usize,
    );
    Json(report)
}
