pub mod health;
pub mod models;
pub mod synergize;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Collaboration (core runtime)
        .route("/api/synergize/initiate", post(synergize::initiate))
        .route("/api/synergize/stream/:session_id", get(synergize::stream))
        .route("/api/synergize/cancel/:session_id", post(synergize::cancel))
        .route(
            "/api/synergize/session/:session_id",
            get(synergize::session_detail),
        )
        // Model discovery
        .route("/api/models", get(models::list_models))
        // Health probe
        .route("/health", get(health::health))
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
