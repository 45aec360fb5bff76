//! `GET/POST /api/event` (§4.11): read and override the event name. The
//! override shadows whatever name the XML database reports.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::error::ValidatedJson;
use crate::api::state::AppState;

pub async fn get_event(State(state): State<AppState>) -> Json<Value> {
    let settings = state.settings.snapshot().await;
    Json(json!({
        "eventName": settings.event_name_override.clone().unwrap_or_else(|| state.event_name_default.clone()),
        "override": settings.event_name_override,
    }))
}

#[derive(Deserialize)]
pub struct SetEventBody {
    #[serde(default)]
    event_name_override: Option<String>,
}

pub async fn set_event(State(state): State<AppState>, ValidatedJson(body): ValidatedJson<SetEventBody>) -> Json<Value> {
    state.settings.set_event_name_override(body.event_name_override.clone()).await;
    Json(json!({ "override": body.event_name_override }))
}
