//! `GET /api/scoreboards`, `POST /api/scoreboards/:id/config` (§4.11):
//! projections of connected sessions and per-session filter control.

use axum::Json;
use axum::extract::{Path, State};
use c123_contracts::SubscriberFilter;

use crate::api::error::{ApiError, ValidatedJson};
use crate::api::state::AppState;
use crate::hub::SessionSummary;

pub async fn list(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.hub.list_sessions())
}

pub async fn set_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    ValidatedJson(filter): ValidatedJson<SubscriberFilter>,
) -> Result<Json<SubscriberFilter>, ApiError> {
    if state.hub.set_filter(id, filter.clone()) {
        Ok(Json(filter))
    } else {
        Err(ApiError::NotFound(format!("no subscriber session with id {id}")))
    }
}
