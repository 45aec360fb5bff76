//! `SettingsStore` (§6 "Persisted state"): the single JSON document holding
//! everything the process must remember across restarts. Writes are
//! temp-file-plus-rename so a crash mid-write never corrupts the document,
//! generalizing the teacher's write-then-persist pattern to a full-document
//! rewrite instead of a row-level SQL upsert.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use c123_contracts::{ClientAssets, ClientConfig, ClientConfigPatch};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum XmlSourceMode {
    AutoOffline,
    AutoMain,
    Manual,
}

impl Default for XmlSourceMode {
    fn default() -> Self {
        Self::AutoOffline
    }
}

/// Forward-compatible: unknown fields are ignored on read, per §6, so a
/// newer process writing extra fields doesn't break an older one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub xml_source_mode: XmlSourceMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xml_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name_override: Option<String>,
    pub client_configs: BTreeMap<String, ClientConfig>,
    pub custom_param_definitions: Vec<String>,
    pub default_assets: ClientAssets,
}

pub struct SettingsStore {
    path: PathBuf,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    /// Loads from `path` if present; a missing or unparseable file yields
    /// defaults rather than an error (best-effort, §4.8/§6's spirit).
    pub async fn load(path: PathBuf) -> Self {
        let settings = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Settings::default(),
        };
        Self {
            path,
            settings: RwLock::new(settings),
        }
    }

    pub async fn snapshot(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn get_client_config(&self, key: &str) -> Option<ClientConfig> {
        self.settings.read().await.client_configs.get(key).cloned()
    }

    pub async fn enumerate_client_configs(&self) -> BTreeMap<String, ClientConfig> {
        self.settings.read().await.client_configs.clone()
    }

    /// Field-wise merges `patch` into `key`'s config and persists the
    /// whole document atomically (§4.10).
    pub async fn upsert_client_config(&self, key: &str, patch: ClientConfigPatch) -> ClientConfig {
        let mut settings = self.settings.write().await;
        let entry = settings.client_configs.entry(key.to_string()).or_default();
        entry.merge(patch);
        let merged = entry.clone();
        let snapshot = settings.clone();
        drop(settings);
        self.persist(&snapshot).await;
        merged
    }

    pub async fn delete_client_config(&self, key: &str) -> bool {
        let mut settings = self.settings.write().await;
        let removed = settings.client_configs.remove(key).is_some();
        let snapshot = settings.clone();
        drop(settings);
        if removed {
            self.persist(&snapshot).await;
        }
        removed
    }

    pub async fn set_label(&self, key: &str, label: String) -> ClientConfig {
        self.upsert_client_config(key, ClientConfigPatch::label(label)).await
    }

    pub async fn touch_last_seen(&self, key: &str) {
        let mut settings = self.settings.write().await;
        let entry = settings.client_configs.entry(key.to_string()).or_default();
        entry.last_seen = Some(chrono::Utc::now());
        let snapshot = settings.clone();
        drop(settings);
        self.persist(&snapshot).await;
    }

    pub async fn set_xml_source_mode(&self, mode: XmlSourceMode) {
        let mut settings = self.settings.write().await;
        settings.xml_source_mode = mode;
        let snapshot = settings.clone();
        drop(settings);
        self.persist(&snapshot).await;
    }

    pub async fn set_event_name_override(&self, name: Option<String>) {
        let mut settings = self.settings.write().await;
        settings.event_name_override = name;
        let snapshot = settings.clone();
        drop(settings);
        self.persist(&snapshot).await;
    }

    async fn persist(&self, settings: &Settings) {
        if let Err(e) = write_atomic(&self.path, settings).await {
            tracing::warn!(error = %e, path = %self.path.display(), "settings persist failed");
        }
    }
}

async fn write_atomic(path: &Path, settings: &Settings) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(settings)?;
    let tmp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp_path, &json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Default location: a `dirs`-resolved user config directory, per §6.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("c123-gateway")
        .join("settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let store = SettingsStore::load(PathBuf::from("/nonexistent/settings.json")).await;
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.xml_source_mode, XmlSourceMode::AutoOffline);
        assert!(snapshot.client_configs.is_empty());
    }

    #[tokio::test]
    async fn upsert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::load(path.clone()).await;

        store
            .upsert_client_config(
                "client-1",
                ClientConfigPatch {
                    display_rows: Some(Some(8)),
                    ..Default::default()
                },
            )
            .await;

        let reloaded = SettingsStore::load(path).await;
        let config = reloaded.get_client_config("client-1").await.unwrap();
        assert_eq!(config.display_rows, Some(8));
    }

    #[tokio::test]
    async fn upsert_merges_custom_params_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json")).await;

        let mut first = ClientConfigPatch::default();
        first.custom_params.insert("a".to_string(), serde_json::json!(1));
        store.upsert_client_config("k", first).await;

        let mut second = ClientConfigPatch::default();
        second.custom_params.insert("b".to_string(), serde_json::json!(2));
        let merged = store.upsert_client_config("k", second).await;

        assert_eq!(merged.custom_params.len(), 2);
    }

    #[tokio::test]
    async fn upsert_with_explicit_null_clears_an_existing_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json")).await;
        store
            .upsert_client_config("k", ClientConfigPatch::label("Finish line".to_string()))
            .await;

        let clear: ClientConfigPatch = serde_json::from_value(serde_json::json!({ "label": null })).unwrap();
        let merged = store.upsert_client_config("k", clear).await;
        assert_eq!(merged.label, None);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json")).await;
        store.upsert_client_config("k", ClientConfigPatch::default()).await;
        assert!(store.delete_client_config("k").await);
        assert!(store.get_client_config("k").await.is_none());
    }
}
