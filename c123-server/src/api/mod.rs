//! The REST + WebSocket control plane (C13), routed the way the teacher's
//! `api::router` composes `Router::new().route(...)` chains.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::Router;
use axum::routing::{get, post};
use state::AppState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(routes::health::health))
        .route("/api/discover", get(routes::discover::discover))
        .route("/api/status", get(routes::status::status))
        .route("/api/sources", get(routes::sources::sources))
        .route("/api/scoreboards", get(routes::scoreboards::list))
        .route("/api/scoreboards/{id}/config", post(routes::scoreboards::set_config))
        .route("/api/clients", get(routes::clients::list))
        .route(
            "/api/clients/{key}",
            get(routes::clients::get).put(routes::clients::upsert).delete(routes::clients::delete),
        )
        .route("/api/clients/{key}/config", get(routes::clients::get))
        .route("/api/clients/{key}/label", post(routes::clients::set_label))
        .route("/api/clients/{key}/refresh", post(routes::clients::refresh))
        .route("/api/broadcast/refresh", post(routes::broadcast::refresh_all))
        .route("/api/xml/status", get(routes::xml::status))
        .route("/api/xml/schedule", get(routes::xml::schedule))
        .route("/api/xml/participants", get(routes::xml::participants))
        .route("/api/xml/races", get(routes::xml::races))
        .route("/api/xml/races/{id}", get(routes::xml::race_detail))
        .route("/api/xml/races/{id}/startlist", get(routes::xml::startlist))
        .route("/api/xml/races/{id}/results", get(routes::xml::results))
        .route("/api/xml/races/{id}/results/{run}", get(routes::xml::results_run))
        .route(
            "/api/config/xml",
            get(routes::config::get_xml_config).post(routes::config::set_xml_config),
        )
        .route("/api/event", get(routes::event::get_event).post(routes::event::set_event))
        .route("/api/logs", get(routes::logs::logs))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
