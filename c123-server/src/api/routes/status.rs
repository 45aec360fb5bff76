//! `GET /api/status` (§4.11): aggregate view of uptime, sources, subscribers,
//! and the current event summary.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::api::state::AppState;
use crate::hub::SessionSummary;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    uptime_seconds: i64,
    event_name: String,
    current_race_id: Option<String>,
    version: u64,
    source_status: SourceStatusSummary,
    subscriber_count: usize,
    subscribers: Vec<SessionSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceStatusSummary {
    tcp: crate::sources::SourceStatus,
    udp: crate::sources::udp::DiscoveryState,
    xml_file: crate::sources::SourceStatus,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.snapshot_rx.borrow().clone();
    let event_name = state.event_name().await;

    Json(StatusResponse {
        uptime_seconds: state.uptime_seconds(),
        event_name,
        current_race_id: snapshot.current_race_id.clone(),
        version: snapshot.version,
        source_status: SourceStatusSummary {
            tcp: *state.sources.tcp.borrow(),
            udp: *state.sources.udp.borrow(),
            xml_file: *state.sources.xml_file.borrow(),
        },
        subscriber_count: state.hub.session_count(),
        subscribers: state.hub.list_sessions(),
    })
}
