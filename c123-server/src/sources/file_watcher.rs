//! `FileWatcher` (C4): watches a file for changes, preferring native OS
//! notifications with a fixed-interval polling fallback, debounced so a
//! flurry of writes collapses into one event.

use std::path::PathBuf;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Native,
    Polling,
}

#[derive(Debug, Clone)]
pub enum FileEvent {
    Ready,
    Changed,
    Error(String),
}

pub struct FileWatcher {
    path: PathBuf,
    mode: WatchMode,
    poll_interval: Duration,
    debounce: Duration,
    cancel: CancelToken,
}

impl FileWatcher {
    pub fn new(path: PathBuf, mode: WatchMode, poll_interval: Duration, debounce: Duration) -> Self {
        Self {
            path,
            mode,
            poll_interval,
            debounce,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(self, tx: mpsc::Sender<FileEvent>) {
        let _ = tx.send(FileEvent::Ready).await;

        match self.mode {
            WatchMode::Native => self.run_native(tx).await,
            WatchMode::Polling => self.run_polling(tx).await,
        }
    }

    async fn run_native(&self, tx: mpsc::Sender<FileEvent>) {
        let (raw_tx, mut raw_rx) = mpsc::channel::<()>(64);

        let watch_path = self.path.clone();
        // The blocking notify watcher thread is abandoned on cancellation
        // (its std::sync::mpsc recv can't be interrupted); it exits on its
        // own once `raw_tx` is dropped and the channel closes.
        let watcher_task = tokio::task::spawn_blocking(move || -> Result<(), notify::Error> {
            let (std_tx, std_rx) = std::sync::mpsc::channel();
            let mut watcher: RecommendedWatcher = notify::recommended_watcher(std_tx)?;
            watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;

            for event in std_rx {
                if event.is_err() {
                    continue;
                }
                if raw_tx.blocking_send(()).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut debounced = debounce_stream(&mut raw_rx, self.debounce);

        loop {
            tokio::select! {
                () = debounced.recv() => {
                    let _ = tx.send(FileEvent::Changed).await;
                }
                _ = self.cancel.cancelled() => {
                    watcher_task.abort();
                    return;
                }
            }
        }
    }

    async fn run_polling(&self, tx: mpsc::Sender<FileEvent>) {
        let mut last_mtime = file_mtime(&self.path);
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let mtime = file_mtime(&self.path);
                    if mtime != last_mtime {
                        last_mtime = mtime;
                        if mtime.is_none() {
                            let _ = tx.send(FileEvent::Error("file not found".to_string())).await;
                        } else {
                            let _ = tx.send(FileEvent::Changed).await;
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    return;
                }
            }
        }
    }
}

fn file_mtime(path: &PathBuf) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

/// Collapses a flurry of raw change ticks into one emission per debounce
/// window.
fn debounce_stream(raw_rx: &mut mpsc::Receiver<()>, window: Duration) -> DebouncedReceiver {
    // Implemented as a standalone task-free debouncer: callers poll `recv()`
    // which drains any additional pending ticks that arrive inside `window`
    // after the first one before returning.
    DebouncedReceiver {
        rx: raw_rx,
        window,
    }
}

struct DebouncedReceiver<'a> {
    rx: &'a mut mpsc::Receiver<()>,
    window: Duration,
}

impl<'a> DebouncedReceiver<'a> {
    async fn recv(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
            return;
        }
        loop {
            tokio::select! {
                more = self.rx.recv() => {
                    if more.is_none() {
                        return;
                    }
                }
                _ = tokio::time::sleep(self.window) => {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn polling_mode_emits_ready_then_changed_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.xml");
        std::fs::write(&path, "<Canoe123Data/>").unwrap();

        let watcher = FileWatcher::new(
            path.clone(),
            WatchMode::Polling,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let token = watcher.cancel_token();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(watcher.run(tx));

        assert!(matches!(rx.recv().await.unwrap(), FileEvent::Ready));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "<!-- touch -->").unwrap();
        drop(f);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, FileEvent::Changed));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn polling_mode_reports_error_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.xml");
        std::fs::write(&path, "<Canoe123Data/>").unwrap();

        let watcher = FileWatcher::new(
            path.clone(),
            WatchMode::Polling,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let token = watcher.cancel_token();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(watcher.run(tx));

        assert!(matches!(rx.recv().await.unwrap(), FileEvent::Ready));
        std::fs::remove_file(&path).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, FileEvent::Error(_)));

        token.cancel();
        handle.await.unwrap();
    }
}
