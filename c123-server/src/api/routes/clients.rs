//! CRUD on `ClientRegistry` (C12), §4.11.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use c123_contracts::{ClientConfig, ClientConfigPatch};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::error::{ApiError, ValidatedJson};
use crate::api::state::AppState;

/// §7's "out-of-range displayRows" 400 case: the spec's range is `3..20`.
const DISPLAY_ROWS_RANGE: std::ops::RangeInclusive<u32> = 3..=20;

pub async fn list(State(state): State<AppState>) -> Json<BTreeMap<String, ClientConfig>> {
    Json(state.registry.enumerate().await)
}

pub async fn get(State(state): State<AppState>, Path(key): Path<String>) -> Result<Json<ClientConfig>, ApiError> {
    state
        .registry
        .get(&key)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no client config for key {key}")))
}

pub async fn upsert(
    State(state): State<AppState>,
    Path(key): Path<String>,
    ValidatedJson(patch): ValidatedJson<ClientConfigPatch>,
) -> Result<Json<Value>, ApiError> {
    if let Some(Some(rows)) = patch.display_rows {
        if !DISPLAY_ROWS_RANGE.contains(&rows) {
            return Err(ApiError::BadRequest(format!(
                "displayRows must be in {}..{}",
                DISPLAY_ROWS_RANGE.start(),
                DISPLAY_ROWS_RANGE.end()
            )));
        }
    }
    let notified = state.registry.upsert(&key, patch).await;
    Ok(Json(json!({ "notified": notified })))
}

pub async fn delete(State(state): State<AppState>, Path(key): Path<String>) -> Result<Json<Value>, ApiError> {
    if state.registry.delete(&key).await {
        Ok(Json(json!({ "deleted": true })))
    } else {
        Err(ApiError::NotFound(format!("no client config for key {key}")))
    }
}

#[derive(Deserialize)]
pub struct LabelBody {
    label: String,
}

pub async fn set_label(
    State(state): State<AppState>,
    Path(key): Path<String>,
    ValidatedJson(body): ValidatedJson<LabelBody>,
) -> Result<Json<Value>, ApiError> {
    if body.label.trim().is_empty() {
        return Err(ApiError::BadRequest("label must not be empty".to_string()));
    }
    let notified = state.registry.set_label(&key, body.label).await;
    Ok(Json(json!({ "notified": notified })))
}

pub async fn refresh(State(state): State<AppState>, Path(key): Path<String>) -> Json<Value> {
    let notified = state.registry.refresh(&key);
    Json(json!({ "notified": notified }))
}
