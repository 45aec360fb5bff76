//! `XmlDatabase` (C8) projections over REST (§4.11).
//!
//! `races/:id/results` treats `:id` as a raceId; with `?merged=true` it
//! instead treats `:id` as a classId and returns the `BR1`/`BR2` merge.
//! `races/:id/results/:run` treats `:id` as a classId and `:run` (`BR1` or
//! `BR2`) as the run suffix of that class's per-run raceId.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::error::ApiError;
use crate::api::state::AppState;

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "available": state.xml_db.is_available() }))
}

pub async fn schedule(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.xml_db.schedule().await))
}

pub async fn participants(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.xml_db.participants().await))
}

pub async fn races(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.xml_db.races().await))
}

pub async fn race_detail(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    state
        .xml_db
        .race_detail(&id)
        .await
        .map(|r| Json(json!(r)))
        .ok_or_else(|| ApiError::NotFound(format!("unknown raceId {id}")))
}

pub async fn startlist(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    Json(json!(state.xml_db.startlist(&id).await))
}

#[derive(Deserialize)]
pub struct ResultsQuery {
    #[serde(default)]
    merged: bool,
}

pub async fn results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Json<Value> {
    if query.merged {
        Json(json!(state.xml_db.merged_results(&id).await))
    } else {
        Json(json!(state.xml_db.results_with_participants(&id).await))
    }
}

pub async fn results_run(
    State(state): State<AppState>,
    Path((class_id, run)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let run_tag = match run.as_str() {
        "BR1" => c123_protocol::RUN_BR1,
        "BR2" => c123_protocol::RUN_BR2,
        other => return Err(ApiError::BadRequest(format!("unknown run '{other}', expected BR1 or BR2"))),
    };
    let race_id = state
        .xml_db
        .race_id_for_run(&class_id, run_tag)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no {run_tag} race scheduled for class {class_id}")))?;
    Ok(Json(json!(state.xml_db.results_with_participants(&race_id).await)))
}
