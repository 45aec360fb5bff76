//! `ClientRegistry` (C12): durable-key-to-`ClientConfig` operations layered
//! on `SettingsStore`, pushing `ConfigPush` envelopes through `SubscriberHub`
//! on every mutation (§4.10).

use std::collections::BTreeMap;
use std::sync::Arc;

use c123_contracts::{ClientConfig, ClientConfigPatch, Envelope};

use crate::hub::SubscriberHub;
use crate::settings::SettingsStore;

pub struct ClientRegistry {
    settings: Arc<SettingsStore>,
    hub: Arc<SubscriberHub>,
}

impl ClientRegistry {
    pub fn new(settings: Arc<SettingsStore>, hub: Arc<SubscriberHub>) -> Self {
        Self { settings, hub }
    }

    pub async fn get(&self, key: &str) -> Option<ClientConfig> {
        self.settings.get_client_config(key).await
    }

    pub async fn enumerate(&self) -> BTreeMap<String, ClientConfig> {
        self.settings.enumerate_client_configs().await
    }

    /// Merges `patch` into `key`'s config, persists, and notifies every
    /// matching session with a fresh `ConfigPush`. Returns the sessions
    /// notified.
    pub async fn upsert(&self, key: &str, patch: ClientConfigPatch) -> usize {
        let merged = self.settings.upsert_client_config(key, patch).await;
        self.push_config(key, &merged)
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.settings.delete_client_config(key).await
    }

    pub async fn set_label(&self, key: &str, label: String) -> usize {
        let merged = self.settings.set_label(key, label).await;
        self.push_config(key, &merged)
    }

    pub async fn touch_last_seen(&self, key: &str) {
        self.settings.touch_last_seen(key).await;
    }

    /// Sends a `ForceRefresh` to every session matching `key` (the REST
    /// `.../refresh` action, §4.11).
    pub fn refresh(&self, key: &str) -> usize {
        self.hub.push_to_key(key, Envelope::force_refresh(None))
    }

    fn push_config(&self, key: &str, config: &ClientConfig) -> usize {
        if config.is_empty() {
            return 0;
        }
        self.hub.push_to_key(key, Envelope::config_push(config.to_config_push_data()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> (ClientRegistry, Arc<SubscriberHub>) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::load(dir.path().join("settings.json")).await);
        let hub = Arc::new(SubscriberHub::new());
        (ClientRegistry::new(settings, hub.clone()), hub)
    }

    #[tokio::test]
    async fn upsert_notifies_only_sessions_with_matching_key() {
        let (registry, hub) = registry().await;
        let (_id, mut rx) = hub.connect("127.0.0.1:1".to_string(), "client-a".to_string());
        let (_id2, mut rx2) = hub.connect("127.0.0.1:2".to_string(), "client-b".to_string());

        let notified = registry
            .upsert(
                "client-a",
                ClientConfigPatch {
                    display_rows: Some(Some(6)),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(notified, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn upsert_with_empty_merge_result_notifies_nobody() {
        let (registry, hub) = registry().await;
        let (_id, mut rx) = hub.connect("127.0.0.1:1".to_string(), "client-a".to_string());
        let notified = registry.upsert("client-a", ClientConfigPatch::default()).await;
        assert_eq!(notified, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn get_reflects_persisted_state() {
        let (registry, _hub) = registry().await;
        registry.upsert("client-a", ClientConfigPatch::label("Finish line".to_string())).await;
        let config = registry.get("client-a").await.unwrap();
        assert_eq!(config.label, Some("Finish line".to_string()));
    }
}
