//! `X-API-Key` authentication middleware. `GET /health` is mounted outside
//! this layer entirely.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use super::error::ApiError;
use crate::AppState;

pub async fn require_api_key(state: axum::extract::State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    if state.internal_api_key.is_empty() {
        // An empty configured key means auth is not set up; refuse rather
        // than silently accepting every request.
        return Err(ApiError::Unauthenticated);
    }

    let presented = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented != state.internal_api_key {
        return Err(ApiError::Unauthenticated);
    }

    Ok(next.run(req).await)
}
