//! `GET/POST /api/config/xml` (§4.11, §4.8): select `ConfigLocator` mode,
//! report candidate paths, and manually trigger detection.

use std::path::PathBuf;

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::error::{ApiError, ValidatedJson};
use crate::api::state::AppState;
use crate::config_locator::LocatorMode;

pub async fn get_xml_config(State(state): State<AppState>) -> Json<Value> {
    let mode = *state.locator_mode_tx.borrow();
    let manual_path = state.locator_manual_tx.borrow().clone();
    let detection = state.locator_rx.borrow().clone();

    Json(json!({
        "mode": mode,
        "manualPath": manual_path,
        "detection": detection,
    }))
}

#[derive(Deserialize)]
pub struct SetXmlConfigBody {
    mode: Option<String>,
    manual_path: Option<PathBuf>,
    #[serde(default)]
    trigger: bool,
}

pub async fn set_xml_config(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<SetXmlConfigBody>,
) -> Result<Json<Value>, ApiError> {
    if let Some(mode) = body.mode {
        let mode = match mode.as_str() {
            "auto-offline" => LocatorMode::AutoOffline,
            "auto-main" => LocatorMode::AutoMain,
            "manual" => LocatorMode::Manual,
            other => return Err(ApiError::BadRequest(format!("unknown mode '{other}'"))),
        };
        let _ = state.locator_mode_tx.send(mode);
    }

    if let Some(path) = body.manual_path {
        let _ = state.locator_manual_tx.send(Some(path));
    }

    if body.trigger {
        let outcome = state.locator.detect();
        return Ok(Json(json!({ "detection": outcome })));
    }

    Ok(Json(json!({ "ok": true })))
}
