//! HTTP adapter: a thin axum layer over the pipeline. All task and
//! session endpoints require `X-API-Key`; `/health` does not.

mod auth;
mod error;
mod routes;
mod sse;

pub use error::ApiError;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/tasks/predefined", post(routes::submit_task))
        .route("/api/sessions", get(routes::list_sessions))
        .route("/api/sessions/:id", get(routes::get_session))
        .route("/api/sessions/:id", delete(routes::kill_session))
        .route("/api/sessions/:id/keepalive", post(routes::keepalive_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .route("/health", get(routes::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
