//! `ConfigLocator` (C10): finds the timing engine's active XML database file
//! by reading its on-disk `user.config`, per §4.8's detection algorithm.

use std::path::{Path, PathBuf};
use std::time::Duration;

use c123_decode::parse_document;
use c123_protocol::{
    ENGINE_SETTINGS_DIR_PREFIX, ENGINE_USER_CONFIG_FILENAME, SETTING_AUTO_COPY_FOLDER,
    SETTING_CURRENT_EVENT_FILE,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorMode {
    AutoOffline,
    AutoMain,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub offline_path: PathBuf,
    pub offline_exists: bool,
    pub main_path: PathBuf,
    pub main_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DetectionOutcome {
    Found(DetectionResult),
    NotFound { reason: String },
}

/// Resolves the path to use given `mode`, falling back per §4.8's rule 5.
pub fn resolve_path(mode: LocatorMode, outcome: &DetectionOutcome, manual_path: Option<&Path>) -> Option<PathBuf> {
    match mode {
        LocatorMode::Manual => manual_path.map(Path::to_path_buf),
        LocatorMode::AutoOffline | LocatorMode::AutoMain => {
            let DetectionOutcome::Found(result) = outcome else {
                return None;
            };
            match mode {
                LocatorMode::AutoOffline => {
                    if result.offline_exists {
                        Some(result.offline_path.clone())
                    } else if result.main_exists {
                        Some(result.main_path.clone())
                    } else {
                        None
                    }
                }
                LocatorMode::AutoMain => {
                    if result.main_exists {
                        Some(result.main_path.clone())
                    } else if result.offline_exists {
                        Some(result.offline_path.clone())
                    } else {
                        None
                    }
                }
                LocatorMode::Manual => unreachable!(),
            }
        }
    }
}

pub struct ConfigLocator {
    settings_root: PathBuf,
    cancel: CancelToken,
}

impl ConfigLocator {
    pub fn new(settings_root: PathBuf) -> Self {
        Self {
            settings_root,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Runs detection once, synchronously (§4.8 steps 1-5). Best-effort: a
    /// missing or unreadable settings tree yields `NotFound`, never an error.
    pub fn detect(&self) -> DetectionOutcome {
        detect_in(&self.settings_root)
    }

    /// Periodically re-runs `detect()`, emitting on `result_tx` only when the
    /// resolved path (under the current `mode`) changes from the prior tick.
    pub async fn run(
        &self,
        interval: Duration,
        mut mode_rx: watch::Receiver<LocatorMode>,
        mut manual_rx: watch::Receiver<Option<PathBuf>>,
        result_tx: watch::Sender<DetectionOutcome>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        let mut last_resolved: Option<PathBuf> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.detect();
                    let mode = *mode_rx.borrow();
                    let manual = manual_rx.borrow().clone();
                    let resolved = resolve_path(mode, &outcome, manual.as_deref());

                    if resolved != last_resolved {
                        info!(path = ?resolved, "config locator: resolved path changed");
                        last_resolved = resolved;
                        let _ = result_tx.send(outcome);
                    }
                }
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

fn detect_in(settings_root: &Path) -> DetectionOutcome {
    let Ok(entries) = std::fs::read_dir(settings_root) else {
        return DetectionOutcome::NotFound {
            reason: format!("settings root not readable: {}", settings_root.display()),
        };
    };

    let mut candidate: Option<(PathBuf, std::time::SystemTime)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(ENGINE_SETTINGS_DIR_PREFIX) {
            continue;
        }
        let config_path = path.join(ENGINE_USER_CONFIG_FILENAME);
        let Ok(meta) = std::fs::metadata(&config_path) else {
            continue;
        };
        let Ok(mtime) = meta.modified() else {
            continue;
        };
        if candidate.as_ref().is_none_or(|(_, prev)| mtime > *prev) {
            candidate = Some((path, mtime));
        }
    }

    let Some((dir, _)) = candidate else {
        return DetectionOutcome::NotFound {
            reason: "no matching settings directory with a user.config".to_string(),
        };
    };

    let config_path = dir.join(ENGINE_USER_CONFIG_FILENAME);
    let Ok(content) = std::fs::read_to_string(&config_path) else {
        return DetectionOutcome::NotFound {
            reason: format!("unreadable: {}", config_path.display()),
        };
    };

    let Some((current_event_file, auto_copy_folder)) = extract_settings(&content) else {
        return DetectionOutcome::NotFound {
            reason: "user.config missing required settings".to_string(),
        };
    };

    let main_path = PathBuf::from(&current_event_file);
    let basename = main_path.file_name().unwrap_or_default();
    let offline_path = PathBuf::from(&auto_copy_folder).join(basename);

    DetectionOutcome::Found(DetectionResult {
        offline_exists: offline_path.exists(),
        offline_path,
        main_exists: main_path.exists(),
        main_path,
    })
}

/// Extracts `<setting name="...">` / `<value>` pairs for the two keys
/// `ConfigLocator` needs, tolerating whichever order they appear in.
fn extract_settings(xml: &str) -> Option<(String, String)> {
    let root = parse_document(xml).ok()?;
    let mut current_event_file = None;
    let mut auto_copy_folder = None;

    for_each_setting(&root, &mut |name, value| match name {
        n if n == SETTING_CURRENT_EVENT_FILE => current_event_file = Some(value.to_string()),
        n if n == SETTING_AUTO_COPY_FOLDER => auto_copy_folder = Some(value.to_string()),
        _ => {}
    });

    Some((current_event_file?, auto_copy_folder?))
}

fn for_each_setting(node: &c123_decode::Element, f: &mut impl FnMut(&str, &str)) {
    if node.name == "setting" {
        if let (Some(name), Some(value)) = (node.attr("name"), node.child("value")) {
            f(name, value.text_trimmed());
        }
    }
    for child in &node.children {
        for_each_setting(child, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_settings_dir(root: &Path, dir_name: &str, current_event_file: &str, auto_copy_folder: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        let config = format!(
            r#"<configuration><userSettings><App.Properties.Settings>
                <setting name="CurrentEventFile" serializeAs="String"><value>{current_event_file}</value></setting>
                <setting name="AutoCopyFolder" serializeAs="String"><value>{auto_copy_folder}</value></setting>
            </App.Properties.Settings></userSettings></configuration>"#
        );
        std::fs::write(dir.join("user.config"), config).unwrap();
    }

    #[test]
    fn missing_settings_root_yields_not_found() {
        let outcome = detect_in(Path::new("/nonexistent/root"));
        assert!(matches!(outcome, DetectionOutcome::NotFound { .. }));
    }

    #[test]
    fn picks_most_recently_modified_matching_sibling() {
        let root = tempfile::tempdir().unwrap();
        let event_path = root.path().join("event.xml");
        std::fs::write(&event_path, "<Canoe123Data/>").unwrap();

        write_settings_dir(root.path(), "Canoe123_old", event_path.to_str().unwrap(), "/tmp/autocopy_old");
        std::thread::sleep(Duration::from_millis(10));
        write_settings_dir(root.path(), "Canoe123_new", event_path.to_str().unwrap(), "/tmp/autocopy_new");

        let outcome = detect_in(root.path());
        let DetectionOutcome::Found(result) = outcome else {
            panic!("expected Found");
        };
        assert_eq!(result.main_path, event_path);
        assert!(result.main_exists);
        assert_eq!(result.offline_path, PathBuf::from("/tmp/autocopy_new/event.xml"));
    }

    #[test]
    fn non_matching_directory_is_ignored() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("SomeOtherApp")).unwrap();
        let outcome = detect_in(root.path());
        assert!(matches!(outcome, DetectionOutcome::NotFound { .. }));
    }

    #[test]
    fn resolve_auto_offline_prefers_offline_then_falls_back_to_main() {
        let found = DetectionOutcome::Found(DetectionResult {
            offline_path: PathBuf::from("/a/offline.xml"),
            offline_exists: false,
            main_path: PathBuf::from("/a/main.xml"),
            main_exists: true,
        });
        assert_eq!(
            resolve_path(LocatorMode::AutoOffline, &found, None),
            Some(PathBuf::from("/a/main.xml"))
        );
    }

    #[test]
    fn resolve_manual_ignores_detection_outcome() {
        let outcome = DetectionOutcome::NotFound { reason: "x".to_string() };
        assert_eq!(
            resolve_path(LocatorMode::Manual, &outcome, Some(Path::new("/manual.xml"))),
            Some(PathBuf::from("/manual.xml"))
        );
    }
}
