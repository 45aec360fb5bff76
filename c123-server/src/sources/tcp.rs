//! `TcpSource` (C2): a long-lived TCP client with exponential-backoff
//! reconnect, grounded on the teacher's `DecoderConnection` read loop
//! generalized with status emission and idempotent cancellation.

use std::sync::Arc;

use c123_decode::FramedStreamReader;
use c123_protocol::{BACKOFF_CAP, BACKOFF_INITIAL, BACKOFF_MULTIPLIER};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::sources::SourceStatus;

#[derive(Debug, Error)]
pub enum TcpSourceError {
    #[error("source is not connected")]
    NotWritable,
}

/// Outbound write handle for §4.2's optional write path; independent of the
/// read-side task so a caller can write frames without holding a lock on
/// the reader. Holds the connection's write half only while `TcpSource` is
/// actually connected.
#[derive(Clone)]
pub struct TcpWriter {
    inner: Arc<Mutex<Option<OwnedWriteHalf>>>,
}

impl TcpWriter {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    async fn set(&self, half: Option<OwnedWriteHalf>) {
        *self.inner.lock().await = half;
    }

    pub async fn write_frame(&self, frame: &str) -> Result<(), TcpSourceError> {
        let mut guard = self.inner.lock().await;
        let Some(half) = guard.as_mut() else {
            return Err(TcpSourceError::NotWritable);
        };
        let mut data = frame.as_bytes().to_vec();
        data.push(c123_protocol::FRAME_DELIMITER);
        if half.write_all(&data).await.is_err() {
            *guard = None;
            return Err(TcpSourceError::NotWritable);
        }
        Ok(())
    }
}

pub struct TcpSource {
    host: String,
    port: u16,
    cancel: CancelToken,
    writer: TcpWriter,
}

impl TcpSource {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            cancel: CancelToken::new(),
            writer: TcpWriter::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// A handle to this source's write path (§4.2), usable independent of
    /// the read loop. Writes fail with `NotWritable` while disconnected.
    pub fn writer(&self) -> TcpWriter {
        self.writer.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Runs until `stop()` is called. Emits frames on `frame_tx` and status
    /// transitions on `status_tx`.
    pub async fn run(self, frame_tx: mpsc::Sender<String>, status_tx: watch::Sender<SourceStatus>) {
        let mut backoff = BACKOFF_INITIAL;

        loop {
            if self.cancel.is_cancelled() {
                let _ = status_tx.send(SourceStatus::Disconnected);
                return;
            }

            let _ = status_tx.send(SourceStatus::Connecting);
            info!(host = %self.host, port = self.port, "tcp source connecting");

            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(stream) => {
                    let _ = status_tx.send(SourceStatus::Connected);
                    info!(host = %self.host, port = self.port, "tcp source connected");

                    let (read_half, write_half) = stream.into_split();
                    self.writer.set(Some(write_half)).await;

                    let (read_result, read_any) = self.read_loop(read_half, &frame_tx).await;
                    self.writer.set(None).await;
                    let _ = status_tx.send(SourceStatus::Disconnected);

                    if self.cancel.is_cancelled() {
                        return;
                    }

                    // Backoff resets on any successful read this connection, not on
                    // why the read loop exited (spec.md S7): a peer that accepts,
                    // sends one byte, then hangs should still reset to 1s.
                    if read_any {
                        backoff = BACKOFF_INITIAL;
                    }
                    if let Err(e) = read_result {
                        warn!(error = %e, "tcp source connection lost");
                    }
                }
                Err(e) => {
                    warn!(error = %e, host = %self.host, port = self.port, "tcp source connect failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => {
                    let _ = status_tx.send(SourceStatus::Disconnected);
                    return;
                }
            }

            backoff = (backoff * BACKOFF_MULTIPLIER).min(BACKOFF_CAP);
        }
    }

    /// Reads until the connection closes, the peer errors, or `stop()` is
    /// called. Returns `Ok(())` only when cancellation ended the loop, plus
    /// whether at least one byte was read this connection.
    async fn read_loop(
        &self,
        mut stream: OwnedReadHalf,
        frame_tx: &mpsc::Sender<String>,
    ) -> (anyhow::Result<()>, bool) {
        let mut reader = FramedStreamReader::new();
        let mut chunk = [0u8; 4096];
        let mut read_any = false;

        loop {
            tokio::select! {
                n = stream.read(&mut chunk) => {
                    let n = match n {
                        Ok(n) => n,
                        Err(e) => return (Err(e.into()), read_any),
                    };
                    if n == 0 {
                        return (Err(anyhow::anyhow!("connection closed by peer")), read_any);
                    }
                    read_any = true;
                    for result in reader.feed(&chunk[..n]) {
                        match result {
                            Ok(frame) => {
                                if frame_tx.send(frame).await.is_err() {
                                    return (Err(anyhow::anyhow!("frame channel closed")), read_any);
                                }
                            }
                            Err(e) => warn!(error = %e, "dropped malformed frame"),
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    return (Ok(()), read_any);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frames_from_accepted_connection_are_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"<Canoe123><TimeOfDay>10:30:00</TimeOfDay></Canoe123>|")
                .await
                .unwrap();
        });

        let source = TcpSource::new("127.0.0.1".to_string(), addr.port());
        let token = source.cancel_token();
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let (status_tx, _status_rx) = watch::channel(SourceStatus::Disconnected);

        let handle = tokio::spawn(source.run(frame_tx, status_tx));

        let frame = frame_rx.recv().await.unwrap();
        assert!(frame.contains("TimeOfDay"));

        server.await.unwrap();
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn writer_is_writable_once_connected_and_not_writable_once_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });

        let source = TcpSource::new("127.0.0.1".to_string(), addr.port());
        let token = source.cancel_token();
        let writer = source.writer();
        let (frame_tx, _frame_rx) = mpsc::channel(8);
        let (status_tx, mut status_rx) = watch::channel(SourceStatus::Disconnected);

        let handle = tokio::spawn(source.run(frame_tx, status_tx));

        while *status_rx.borrow() != SourceStatus::Connected {
            status_rx.changed().await.unwrap();
        }

        writer.write_frame("<Canoe123/>").await.unwrap();
        let received = server.await.unwrap();
        assert_eq!(received, b"<Canoe123/>|");

        token.cancel();
        handle.await.unwrap();

        assert!(matches!(writer.write_frame("<Canoe123/>").await, Err(TcpSourceError::NotWritable)));
    }

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        let mut d = BACKOFF_INITIAL;
        for _ in 0..10 {
            d = (d * BACKOFF_MULTIPLIER).min(BACKOFF_CAP);
        }
        assert_eq!(d, BACKOFF_CAP);
    }
}
