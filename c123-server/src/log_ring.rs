//! Bounded in-process log ring buffer backing `GET /api/logs` and the
//! `LogEntry` push envelope. A `tracing_subscriber::Layer` feeds it so the
//! same log stream backs stderr output, the admin API, and the push
//! channel — one `Arc<Mutex<VecDeque<_>>>` constructed once in `main` and
//! threaded through `AppState`, not a process-wide static.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

use c123_contracts::Envelope;
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::hub::SubscriberHub;

pub const LOG_RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Drop-oldest-on-full ring buffer shared between the `tracing` layer, the
/// REST handler, and the push-channel broadcaster.
#[derive(Clone)]
pub struct LogRing {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    hub: Arc<OnceLock<Arc<SubscriberHub>>>,
}

impl LogRing {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY))),
            hub: Arc::new(OnceLock::new()),
        }
    }

    /// Wires this ring to the push-channel hub so entries recorded from here
    /// on also go out as `LogEntry` envelopes (§4.11). The ring is built
    /// before the hub exists (it needs to catch logs from process startup),
    /// so this is set once, after both are constructed, rather than passed
    /// into `new`. There's no separate admin session concept anywhere in the
    /// subscriber model, so every connected subscriber receives log entries.
    pub fn attach_hub(&self, hub: Arc<SubscriberHub>) {
        let _ = self.hub.set(hub);
    }

    fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= LOG_RING_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        drop(entries);

        if let Some(hub) = self.hub.get() {
            hub.broadcast(Envelope::log_entry(serde_json::to_value(&entry).unwrap_or_default()));
        }
    }

    /// Most recent entries last, optionally filtered by level set and a
    /// case-insensitive substring match (§4.11 `GET /api/logs`).
    pub fn read(&self, levels: Option<&[String]>, contains: Option<&str>, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap();
        let needle = contains.map(str::to_lowercase);

        entries
            .iter()
            .rev()
            .filter(|e| levels.is_none_or(|ls| ls.iter().any(|l| l.eq_ignore_ascii_case(&e.level))))
            .filter(|e| needle.as_deref().is_none_or(|n| e.message.to_lowercase().contains(n)))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogRing {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.push(LogEntry {
            timestamp: chrono::Utc::now(),
            level: level_label(*event.metadata().level()),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        });
    }
}

fn level_label(level: Level) -> String {
    level.as_str().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: chrono::Utc::now(),
            level: level.to_string(),
            target: "test".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let ring = LogRing::new();
        for i in 0..LOG_RING_CAPACITY + 10 {
            ring.push(entry("info", &format!("entry {i}")));
        }
        let all = ring.read(None, None, LOG_RING_CAPACITY + 10);
        assert_eq!(all.len(), LOG_RING_CAPACITY);
        assert!(all.last().unwrap().message.contains("entry 10"));
    }

    #[test]
    fn filters_by_level_and_substring() {
        let ring = LogRing::new();
        ring.push(entry("info", "connected to tcp source"));
        ring.push(entry("warn", "udp discovery timed out"));
        ring.push(entry("error", "file unavailable"));

        let warnings = ring.read(Some(&["warn".to_string()]), None, 10);
        assert_eq!(warnings.len(), 1);

        let matching = ring.read(None, Some("TCP"), 10);
        assert_eq!(matching.len(), 1);
    }

    #[test]
    fn read_returns_most_recent_first() {
        let ring = LogRing::new();
        ring.push(entry("info", "first"));
        ring.push(entry("info", "second"));
        let entries = ring.read(None, None, 10);
        assert_eq!(entries[0].message, "second");
    }

    #[test]
    fn attached_hub_receives_pushed_entries_as_log_entry_envelopes() {
        use c123_contracts::EnvelopeType;

        let ring = LogRing::new();
        let hub = Arc::new(SubscriberHub::new());
        ring.attach_hub(hub.clone());
        let (_id, mut rx) = hub.connect("127.0.0.1:1".to_string(), "k1".to_string());

        ring.push(entry("warn", "udp discovery timed out"));

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.kind, EnvelopeType::LogEntry);
        assert_eq!(envelope.data["message"], "udp discovery timed out");
    }

    #[test]
    fn push_without_an_attached_hub_does_not_panic() {
        let ring = LogRing::new();
        ring.push(entry("info", "no subscribers yet"));
        assert_eq!(ring.read(None, None, 10).len(), 1);
    }
}
