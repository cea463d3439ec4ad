//! Health probe with per-subsystem checks.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use sy_store::KeyValueStore;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    // State store: a read-your-write round trip.
    let store_ok = match state.kv.set("health:ping", "pong", None).await {
        Ok(()) => matches!(
            state.kv.get("health:ping").await,
            Ok(Some(v)) if v == "pong"
        ),
        Err(_) => false,
    };
    let store_check = if store_ok {
        serde_json::json!({ "status": "ok" })
    } else {
        serde_json::json!({ "status": "down", "message": "round trip failed" })
    };

    // Memory: live entry count in the in-process store.
    let memory_check = serde_json::json!({
        "status": "ok",
        "message": format!("{} live entries", state.kv.len()),
    });

    // Models: discovery plus pool utilization.
    let pools: Vec<serde_json::Value> = state
        .pools
        .snapshot()
        .into_iter()
        .map(|(model_id, in_use, capacity)| {
            serde_json::json!({ "modelId": model_id, "inUse": in_use, "capacity": capacity })
        })
        .collect();
    let model_count = state.registry.list().len();
    let models_check = if model_count > 0 {
        serde_json::json!({ "status": "ok", "message": format!("{model_count} models"), "pools": pools })
    } else {
        serde_json::json!({ "status": "degraded", "message": "no models discovered", "pools": pools })
    };

    let status = if store_ok && model_count > 0 { "ok" } else { "degraded" };

    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "memory": memory_check,
            "stateStore": store_check,
            "models": models_check,
        },
        "activeSessions": state.streams.session_count(),
    }))
}
