//! `UdpAnnouncer` (C3): listens for the engine's UDP announce broadcast and
//! latches the source IP on the first valid datagram.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use c123_protocol::{DEFAULT_UDP_PORT, DISCOVERY_TIMEOUT_SECS, has_magic_prefix};
use serde::Serialize;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryState {
    Waiting,
    Discovered,
    TimedOut,
}

pub struct UdpAnnouncer {
    port: u16,
    cancel: CancelToken,
}

impl UdpAnnouncer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            cancel: CancelToken::new(),
        }
    }

    pub fn default_port() -> Self {
        Self::new(DEFAULT_UDP_PORT)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Runs until `stop()` is called. `message_tx` receives every valid
    /// frame plus its source address; `discovery_tx` latches exactly once.
    pub async fn run(
        self,
        message_tx: mpsc::Sender<(String, SocketAddr)>,
        discovery_tx: watch::Sender<Option<SocketAddr>>,
        state_tx: watch::Sender<DiscoveryState>,
    ) -> anyhow::Result<()> {
        let socket = bind_reuseaddr(self.port)?;
        info!(port = self.port, "udp announcer bound");

        let mut buf = vec![0u8; 64 * 1024];
        let mut discovered = false;
        let timeout = tokio::time::sleep(Duration::from_secs(DISCOVERY_TIMEOUT_SECS));
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                recv = socket.recv_from(&mut buf) => {
                    let (n, addr) = match recv {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "udp recv error");
                            continue;
                        }
                    };

                    let Ok(text) = std::str::from_utf8(&buf[..n]) else {
                        continue;
                    };
                    if !has_magic_prefix(text) {
                        continue;
                    }

                    if message_tx.send((text.to_string(), addr)).await.is_err() {
                        return Ok(());
                    }

                    if !discovered {
                        discovered = true;
                        let _ = discovery_tx.send(Some(addr));
                        let _ = state_tx.send(DiscoveryState::Discovered);
                        info!(host = %addr, "udp announcer discovered host");
                    }
                }
                _ = &mut timeout, if !discovered => {
                    let _ = state_tx.send(DiscoveryState::TimedOut);
                    info!("udp announcer discovery timed out");
                }
                _ = self.cancel.cancelled() => {
                    return Ok(());
                }
            }
        }
    }
}

/// Binds `0.0.0.0:port` with `SO_REUSEADDR` set, so a restart doesn't have
/// to wait out the previous socket's `TIME_WAIT` before rebinding.
fn bind_reuseaddr(port: u16) -> anyhow::Result<UdpSocket> {
    let addr = SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port);
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_reuseaddr_allows_immediate_rebind_of_the_same_port() {
        let first = bind_reuseaddr(0).unwrap();
        let port = first.local_addr().unwrap().port();
        drop(first);

        let second = bind_reuseaddr(port);
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn first_valid_datagram_latches_exactly_once() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        drop(socket);

        let announcer = UdpAnnouncer::new(addr.port());
        let token = announcer.cancel_token();
        let (message_tx, mut message_rx) = mpsc::channel(8);
        let (discovery_tx, mut discovery_rx) = watch::channel(None);
        let (state_tx, _state_rx) = watch::channel(DiscoveryState::Waiting);

        let handle = tokio::spawn(announcer.run(message_tx, discovery_tx, state_tx));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"<Canoe123 System=\"Main\"/>", addr)
            .await
            .unwrap();
        sender
            .send_to(b"<Canoe123 System=\"Main\"/>", addr)
            .await
            .unwrap();

        let (frame, _src) = message_rx.recv().await.unwrap();
        assert!(frame.contains("Canoe123"));
        let _ = message_rx.recv().await.unwrap();

        discovery_rx.changed().await.unwrap();
        assert!(discovery_rx.borrow().is_some());

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_payload_is_ignored_silently() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        drop(socket);

        let announcer = UdpAnnouncer::new(addr.port());
        let token = announcer.cancel_token();
        let (message_tx, mut message_rx) = mpsc::channel(8);
        let (discovery_tx, _discovery_rx) = watch::channel(None);
        let (state_tx, _state_rx) = watch::channel(DiscoveryState::Waiting);

        let handle = tokio::spawn(announcer.run(message_tx, discovery_tx, state_tx));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"not xml at all", addr).await.unwrap();

        token.cancel();
        handle.await.unwrap().unwrap();
        assert!(message_rx.try_recv().is_err());
    }
}
