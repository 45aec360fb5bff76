//! `XmlFileSource` (C5): reads a file on `FileWatcher` change events,
//! validates the magic prefix, and emits its full content as one frame.

use std::path::PathBuf;

use c123_protocol::has_magic_prefix;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::cancel::CancelToken;
use crate::sources::SourceStatus;
use crate::sources::file_watcher::FileEvent;

pub struct XmlFileSource {
    path: PathBuf,
    cancel: CancelToken,
}

impl XmlFileSource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Consumes `FileWatcher` events, emitting frames and status transitions.
    pub async fn run(
        self,
        mut watch_events: mpsc::Receiver<FileEvent>,
        frame_tx: mpsc::Sender<String>,
        status_tx: watch::Sender<SourceStatus>,
    ) {
        let mut was_connected = false;

        loop {
            tokio::select! {
                event = watch_events.recv() => {
                    let Some(event) = event else { return };
                    match event {
                        FileEvent::Ready | FileEvent::Changed => {
                            self.read_and_emit(&frame_tx, &status_tx, &mut was_connected).await;
                        }
                        FileEvent::Error(message) => {
                            warn!(error = %message, path = %self.path.display(), "xml file source error");
                            let _ = status_tx.send(SourceStatus::Connecting);
                            was_connected = false;
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    let _ = status_tx.send(SourceStatus::Disconnected);
                    return;
                }
            }
        }
    }

    async fn read_and_emit(
        &self,
        frame_tx: &mpsc::Sender<String>,
        status_tx: &watch::Sender<SourceStatus>,
        was_connected: &mut bool,
    ) {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                if !has_magic_prefix(&content) {
                    warn!(path = %self.path.display(), "xml file source: missing magic prefix, dropping frame");
                    return;
                }
                let _ = status_tx.send(SourceStatus::Connected);
                *was_connected = true;
                if frame_tx.send(content).await.is_err() {
                    // receiver dropped; loop will keep running until cancelled
                }
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "xml file source: file unavailable");
                let _ = status_tx.send(SourceStatus::Connecting);
                *was_connected = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_full_content_as_one_frame_on_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.xml");
        std::fs::write(&path, "<Canoe123Data></Canoe123Data>").unwrap();

        let source = XmlFileSource::new(path);
        let token = source.cancel_token();
        let (watch_tx, watch_rx) = mpsc::channel(8);
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let (status_tx, mut status_rx) = watch::channel(SourceStatus::Disconnected);

        let handle = tokio::spawn(source.run(watch_rx, frame_tx, status_tx));
        watch_tx.send(FileEvent::Ready).await.unwrap();

        let frame = frame_rx.recv().await.unwrap();
        assert!(frame.contains("Canoe123Data"));
        status_rx.changed().await.unwrap();
        assert_eq!(*status_rx.borrow(), SourceStatus::Connected);

        token.cancel();
        drop(watch_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn drops_frame_missing_magic_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.xml");
        std::fs::write(&path, "<NotCanoe/>").unwrap();

        let source = XmlFileSource::new(path);
        let token = source.cancel_token();
        let (watch_tx, watch_rx) = mpsc::channel(8);
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let (status_tx, _status_rx) = watch::channel(SourceStatus::Disconnected);

        let handle = tokio::spawn(source.run(watch_rx, frame_tx, status_tx));
        watch_tx.send(FileEvent::Ready).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(frame_rx.try_recv().is_err());

        token.cancel();
        drop(watch_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn file_error_demotes_status_to_connecting() {
        let source = XmlFileSource::new(PathBuf::from("/nonexistent/path.xml"));
        let token = source.cancel_token();
        let (watch_tx, watch_rx) = mpsc::channel(8);
        let (frame_tx, _frame_rx) = mpsc::channel(8);
        let (status_tx, mut status_rx) = watch::channel(SourceStatus::Connected);

        let handle = tokio::spawn(source.run(watch_rx, frame_tx, status_tx));
        watch_tx.send(FileEvent::Error("gone".to_string())).await.unwrap();

        status_rx.changed().await.unwrap();
        assert_eq!(*status_rx.borrow(), SourceStatus::Connecting);

        token.cancel();
        drop(watch_tx);
        handle.await.unwrap();
    }
}
