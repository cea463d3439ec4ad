//! Collaboration API endpoints.
//!
//! - `POST /api/synergize/initiate`            — seed a session, start the orchestrator
//! - `GET  /api/synergize/stream/:session_id`  — the session's SSE stream
//! - `POST /api/synergize/cancel/:session_id`  — abort a running session
//! - `GET  /api/synergize/session/:session_id` — conversation-state inspection

use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use sy_domain::config::Environment;
use sy_domain::events::SynergyEvent;
use sy_domain::Error;
use sy_store::adapter::SessionRecord;

use crate::runtime::{spawn_collaboration, CollaborationInput};
use crate::state::AppState;

use super::api_error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/synergize/initiate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub prompt: String,
    pub models: Vec<String>,
    pub session_id: String,
}

pub async fn initiate(
    State(state): State<AppState>,
    Json(body): Json<InitiateRequest>,
) -> Response {
    if body.prompt.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "prompt must not be empty");
    }
    if body.models.len() != 2 {
        return api_error(StatusCode::BAD_REQUEST, "exactly two models are required");
    }
    if body.session_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "sessionId must be present");
    }

    // Pre-flight: refuse early when no models were discovered.
    let Some(engine) = state.engine.clone() else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "no models available — check the models directory",
        );
    };
    for model_id in &body.models {
        if state.registry.get(model_id).is_none() {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown model: {model_id}"),
            );
        }
    }
    if state.cancel_map.is_running(&body.session_id) {
        return api_error(StatusCode::CONFLICT, "session is already running");
    }

    let max_sessions = state.config.collab.max_concurrent_sessions;
    if state.active_sessions.load(Ordering::Acquire) >= max_sessions {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("at capacity ({max_sessions} concurrent sessions)"),
        );
    }

    let record = SessionRecord {
        prompt: body.prompt.clone(),
        models: [body.models[0].clone(), body.models[1].clone()],
        status: "initiated".into(),
        created_at: Utc::now(),
    };
    if let Err(e) = state.store.save_session(&body.session_id, &record).await {
        tracing::error!(session_id = %body.session_id, error = %e, "session seed write failed");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "state store unavailable");
    }

    let session_id = body.session_id.clone();
    spawn_collaboration(
        state,
        engine,
        CollaborationInput {
            session_id: body.session_id,
            query: body.prompt,
            models: [record.models[0].clone(), record.models[1].clone()],
        },
    );

    Json(serde_json::json!({
        "sessionId": session_id,
        "message": "collaboration initiated",
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/synergize/stream/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cancels the session and frees its channel when the subscriber goes
/// away, whether by finishing or by disconnecting mid-stream.
struct StreamGuard {
    state: AppState,
    session_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.state.cancel_map.cancel(&self.session_id) {
            tracing::info!(session_id = %self.session_id, "subscriber gone, session cancelled");
        }
        self.state.streams.remove(&self.session_id);
    }
}

pub async fn stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    // The session must exist, carry its creation time, and be young
    // enough to stream.
    let record = match state.store.load_session(&session_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return api_error(StatusCode::GONE, "session not found or expired"),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "session lookup failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "state store unavailable");
        }
    };
    let max_age_secs = match state.config.environment {
        Environment::Development => state.config.collab.max_session_age_dev_secs,
        Environment::Production => state.config.collab.max_session_age_prod_secs,
    };
    let age = Utc::now().signed_duration_since(record.created_at);
    if age > chrono::Duration::seconds(max_age_secs as i64) {
        tracing::info!(session_id = %session_id, age_secs = age.num_seconds(), "stale session refused");
        return api_error(StatusCode::GONE, "session too old to stream");
    }

    let Some(mut rx) = state.streams.take_receiver(&session_id) else {
        return api_error(
            StatusCode::CONFLICT,
            "session already has a stream subscriber",
        );
    };

    let heartbeat = Duration::from_secs(state.config.collab.heartbeat_secs);
    let guard = StreamGuard {
        state,
        session_id: session_id.clone(),
    };

    let events = async_stream::stream! {
        let _guard = guard;

        let hello = SynergyEvent::Connection {
            session_id: session_id.clone(),
            message: "stream established".into(),
        };
        yield Ok::<_, Infallible>(to_sse_event(&hello));

        while let Some(event) = rx.recv().await {
            let last = matches!(event, SynergyEvent::CollaborationComplete { .. });
            yield Ok(to_sse_event(&event));
            if last {
                break;
            }
        }
    };

    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(heartbeat)
            .text("heartbeat"),
    );

    // Disable intermediary buffering so tokens reach the client as they
    // are produced.
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    )
        .into_response()
}

fn to_sse_event(event: &SynergyEvent) -> Event {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
    Event::default().data(json)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/synergize/cancel/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.cancel_map.cancel(&session_id);
    if cancelled {
        tracing::info!(session_id = %session_id, "cancel requested via API");
    }
    Json(serde_json::json!({
        "sessionId": session_id,
        "cancelled": cancelled,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/synergize/session/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn session_detail(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.conversations.load(&session_id).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(Error::SessionExpired(_)) => api_error(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "conversation lookup failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "state store unavailable")
        }
    }
}
