use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::api::state::AppState;
use crate::sources::SourceStatus;
use crate::sources::udp::DiscoveryState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesResponse {
    tcp: SourceStatus,
    udp: DiscoveryState,
    xml_file: SourceStatus,
}

pub async fn sources(State(state): State<AppState>) -> Json<SourcesResponse> {
    Json(SourcesResponse {
        tcp: *state.sources.tcp.borrow(),
        udp: *state.sources.udp.borrow(),
        xml_file: *state.sources.xml_file.borrow(),
    })
}
