//! Ingestion sources (C2-C5): TCP, UDP, and file-based readers that each
//! turn a raw transport into frames and a status stream.

pub mod file_watcher;
pub mod tcp;
pub mod udp;
pub mod xml_file_source;

use serde::Serialize;

/// Connection lifecycle shared by every source, surfaced in `/api/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Disconnected,
    Connecting,
    Connected,
}
