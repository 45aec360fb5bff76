//! `GET /api/logs` (§4.11): paginated read of the in-process log ring.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use crate::api::state::AppState;
use crate::log_ring::LogEntry;

#[derive(Deserialize)]
pub struct LogsQuery {
    levels: Option<String>,
    contains: Option<String>,
    limit: Option<usize>,
}

pub async fn logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Json<Vec<LogEntry>> {
    let levels: Option<Vec<String>> = query.levels.map(|s| s.split(',').map(|l| l.trim().to_string()).collect());
    let limit = query.limit.unwrap_or(crate::log_ring::LOG_RING_CAPACITY).min(crate::log_ring::LOG_RING_CAPACITY);

    Json(state.log_ring.read(levels.as_deref(), query.contains.as_deref(), limit))
}
