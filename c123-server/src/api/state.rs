//! Shared application state available to all Axum handlers, grounded on the
//! teacher's `AppState` (one `#[derive(Clone)]` struct of shared handles).

use std::path::PathBuf;
use std::sync::Arc;

use c123_contracts::EventSnapshot;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::config_locator::{ConfigLocator, DetectionOutcome, LocatorMode};
use crate::hub::SubscriberHub;
use crate::log_ring::LogRing;
use crate::registry::ClientRegistry;
use crate::settings::SettingsStore;
use crate::sources::SourceStatus;
use crate::sources::udp::DiscoveryState;
use crate::xml_database::XmlDatabase;

#[derive(Clone)]
pub struct SourceStatuses {
    pub tcp: watch::Receiver<SourceStatus>,
    pub udp: watch::Receiver<DiscoveryState>,
    pub xml_file: watch::Receiver<SourceStatus>,
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SubscriberHub>,
    pub registry: Arc<ClientRegistry>,
    pub settings: Arc<SettingsStore>,
    pub xml_db: Arc<XmlDatabase>,
    pub snapshot_rx: watch::Receiver<Arc<EventSnapshot>>,
    pub sources: SourceStatuses,
    pub locator: Arc<ConfigLocator>,
    pub locator_rx: watch::Receiver<DetectionOutcome>,
    pub locator_mode_tx: watch::Sender<LocatorMode>,
    pub locator_manual_tx: watch::Sender<Option<PathBuf>>,
    pub log_ring: LogRing,
    pub started_at: DateTime<Utc>,
    pub port: u16,
    pub event_name_default: String,
}

impl AppState {
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }

    pub async fn event_name(&self) -> String {
        self.settings
            .snapshot()
            .await
            .event_name_override
            .unwrap_or_else(|| self.event_name_default.clone())
    }
}
