//! Model discovery endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Serialize;

use sy_inference::formatter::TemplateFamily;
use sy_inference::registry::ModelSettings;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelView {
    id: String,
    name: String,
    context_size: u32,
    template: TemplateFamily,
    settings: ModelSettings,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let models: Vec<ModelView> = state
        .registry
        .list()
        .iter()
        .map(|spec| ModelView {
            id: spec.id.clone(),
            name: spec.name.clone(),
            context_size: spec.context_size,
            template: spec.template,
            settings: spec.settings,
        })
        .collect();

    Json(serde_json::json!({ "models": models }))
}
