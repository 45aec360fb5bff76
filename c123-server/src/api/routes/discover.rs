//! `GET /api/discover` (§4.11): minimal identity, must answer without
//! blocking I/O — every field here is already resident in `AppState`.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::api::state::AppState;

pub async fn discover(State(state): State<AppState>) -> Json<Value> {
    let event_name = state
        .settings
        .snapshot()
        .await
        .event_name_override
        .unwrap_or_else(|| state.event_name_default.clone());

    Json(json!({
        "service": "c123-server",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.port,
        "eventName": event_name,
    }))
}
