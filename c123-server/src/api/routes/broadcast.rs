use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::state::AppState;

#[derive(Deserialize, Default)]
pub struct RefreshBody {
    reason: Option<String>,
}

pub async fn refresh_all(State(state): State<AppState>, body: Option<Json<RefreshBody>>) -> Json<Value> {
    let reason = body.map(|Json(b)| b.reason).unwrap_or(None);
    state.hub.broadcast_force_refresh(reason);
    Json(json!({ "notified": state.hub.session_count() }))
}
