use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use super::handler::serve_app;
use super::state::ServeState;

pub const LIVE_PATH: &str = "/_prerender/livez";
pub const READY_PATH: &str = "/_prerender/readyz";

/// Probe routes plus the application fallback for everything else.
pub fn build_router(state: ServeState) -> Router {
    Router::new()
        .route(LIVE_PATH, get(live_handler))
        .route(READY_PATH, get(ready_handler))
        .fallback(serve_app)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn live_handler(State(state): State<ServeState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot();
    let status = if snapshot.live {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "live": snapshot.live,
            "ready": snapshot.ready,
        })),
    )
}

async fn ready_handler(State(state): State<ServeState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot();
    let renderer_ready = state
        .renderer
        .as_ref()
        .map_or(true, |renderer| renderer.is_ready());
    let ready = snapshot.ready && renderer_ready;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": ready,
            "rendering": state.is_rendering(),
            "cached_pages": state.cache().map(|cache| cache.len()),
            "last_ready_check_ts": snapshot.last_ready_check,
            "last_error": snapshot.last_error,
        })),
    )
}
