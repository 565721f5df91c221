//! HTTP status mapping for pipeline and auth failures.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use crate::pipeline::PipelineError;

/// A request rejected before the event stream is ever opened.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    Pipeline(PipelineError),
    Internal(String),
    ShuttingDown,
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

/// Default retry hint for capacity refusals. Callers have no better signal
/// than "try again shortly".
const RETRY_AFTER_SECS: &str = "5";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // §6/§8 scenario 3: a capacity refusal body is `{status, difficulty}`
        // or `{status}`, not the generic `{error}` shape, so a conformant
        // client can branch on `status` without string-matching a message.
        let (status, body, retry_after): (StatusCode, Value, bool) = match &self {
            ApiError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, json!({ "error": "invalid or missing API key" }), false)
            }
            ApiError::Pipeline(PipelineError::Catalog(e)) => {
                (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }), false)
            }
            ApiError::Pipeline(PipelineError::ImageNotAllowed(image)) => {
                (StatusCode::BAD_REQUEST, json!({ "error": format!("image {image} is not allowed") }), false)
            }
            ApiError::Pipeline(PipelineError::SessionNotFound(id)) => {
                (StatusCode::NOT_FOUND, json!({ "error": format!("session {id} not found") }), false)
            }
            ApiError::Pipeline(PipelineError::InvalidSessionState(id, status)) => {
                (StatusCode::NOT_FOUND, json!({ "error": format!("session {id} is in state {status:?}") }), false)
            }
            ApiError::Pipeline(PipelineError::CapacityFull(d)) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "status": "full", "difficulty": d.to_string() }), true)
            }
            ApiError::Pipeline(PipelineError::QueueFull) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "status": "queue_full" }), true)
            }
            ApiError::Pipeline(PipelineError::Model(e)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }), false)
            }
            ApiError::Pipeline(PipelineError::Container(e)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() }), false)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }), false),
            ApiError::ShuttingDown => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": "server is shutting down" }), true)
            }
        };

        let mut response = (status, axum::Json(body)).into_response();
        if retry_after {
            response.headers_mut().insert("Retry-After", HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Difficulty;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn capacity_full_body_matches_documented_shape() {
        let response = ApiError::Pipeline(PipelineError::CapacityFull(Difficulty::Low)).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key("Retry-After"));
        assert_eq!(body_json(response).await, json!({ "status": "full", "difficulty": "low" }));
    }

    #[tokio::test]
    async fn queue_full_body_matches_documented_shape() {
        let response = ApiError::Pipeline(PipelineError::QueueFull).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await, json!({ "status": "queue_full" }));
    }
}
