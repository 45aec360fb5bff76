//! Push-channel WebSocket upgrade handler (C11 connect flow, §4.9), grounded
//! on the teacher's `handle_socket` (`ws.on_upgrade`, `socket.split()`,
//! `select!` over outbound + inbound) but fed from a per-session channel
//! instead of one shared broadcast, since delivery is filtered per session.

use std::net::SocketAddr;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::response::Response;
use c123_contracts::{Envelope, InboundMessage};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    client_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote, query.client_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, remote: SocketAddr, client_id: Option<String>) {
    let durable_key = client_id.filter(|s| !s.is_empty()).unwrap_or_else(|| remote.ip().to_string());
    let (session_id, mut outbound_rx) = state.hub.connect(remote.to_string(), durable_key.clone());

    info!(session_id, durable_key = %durable_key, "subscriber connected");

    let (mut sink, mut stream) = socket.split();

    if send(&mut sink, &Envelope::connected(session_id)).await.is_err() {
        state.hub.disconnect(session_id);
        return;
    }

    if let Some(config) = state.registry.get(&durable_key).await {
        if !config.is_empty() {
            let _ = send(&mut sink, &Envelope::config_push(config.to_config_push_data())).await;
        }
    }
    state.registry.touch_last_seen(&durable_key).await;

    loop {
        tokio::select! {
            envelope = outbound_rx.recv() => {
                let Some(envelope) = envelope else { break };
                if send(&mut sink, &envelope).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_inbound(&state, session_id, &text);
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(session_id);
    info!(session_id, "subscriber disconnected");
}

fn handle_inbound(state: &AppState, session_id: u64, text: &str) {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::ClientState { data }) => {
            state.hub.record_client_state(session_id, data);
            state.hub.touch_last_seen(session_id);
        }
        Err(_) => {
            // Malformed or unrecognized inbound messages are tolerated (§4.9).
        }
    }
}

async fn send(
    sink: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(envelope).unwrap_or_default();
    sink.send(WsMessage::text(json)).await
}
