//! `SubscriberHub` (C11): tracks push-channel sessions and fans envelopes
//! out to each one through its own filter (§4.9). Unlike the teacher's
//! single `broadcast::Sender` (every client sees every message, C11 needs
//! per-session suppression, so each session gets its own outgoing channel
//! and the hub applies `SubscriberFilter::admits` before sending.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use c123_contracts::{Envelope, EnvelopeType, SubscriberFilter};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

struct Session {
    remote_addr: String,
    durable_key: String,
    filter: SubscriberFilter,
    client_state: Option<Value>,
    last_seen: chrono::DateTime<chrono::Utc>,
    sender: mpsc::UnboundedSender<Envelope>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: u64,
    pub remote_addr: String,
    pub durable_key: String,
    pub filter: SubscriberFilter,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

pub struct SubscriberHub {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Session>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new session with a fresh `sessionId`, returning it plus
    /// the receiving half of its private outgoing channel.
    pub fn connect(&self, remote_addr: String, durable_key: String) -> (u64, mpsc::UnboundedReceiver<Envelope>) {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(
            session_id,
            Session {
                remote_addr,
                durable_key,
                filter: SubscriberFilter::default(),
                client_state: None,
                last_seen: chrono::Utc::now(),
                sender: tx,
            },
        );
        info!(session_id, "subscriber connected");
        (session_id, rx)
    }

    pub fn disconnect(&self, session_id: u64) {
        self.sessions.lock().unwrap().remove(&session_id);
        info!(session_id, "subscriber disconnected");
    }

    pub fn durable_key(&self, session_id: u64) -> Option<String> {
        self.sessions.lock().unwrap().get(&session_id).map(|s| s.durable_key.clone())
    }

    pub fn set_filter(&self, session_id: u64, filter: SubscriberFilter) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(&session_id) {
            Some(session) => {
                session.filter = filter;
                true
            }
            None => false,
        }
    }

    /// Stores the opaque `ClientState` payload verbatim for admin visibility
    /// (§4.9). Malformed/unrecognized inbound messages are ignored upstream.
    pub fn record_client_state(&self, session_id: u64, data: Value) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
            session.client_state = Some(data);
        }
    }

    pub fn touch_last_seen(&self, session_id: u64) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(&session_id) {
            session.last_seen = chrono::Utc::now();
        }
    }

    /// Sends `envelope` to every session whose filter admits it. A session
    /// whose channel is closed is dropped lazily (§4.9).
    pub fn broadcast(&self, envelope: Envelope) {
        let race_id = results_race_id(&envelope);
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|_, session| {
            if !session.filter.admits(envelope.kind, race_id.as_deref()) {
                return true;
            }
            session.sender.send(envelope.clone()).is_ok()
        });
    }

    pub fn broadcast_xml_change(&self, sections: &[String], checksum: &str) {
        self.broadcast(Envelope::xml_change(sections, checksum));
    }

    pub fn broadcast_force_refresh(&self, reason: Option<String>) {
        self.broadcast(Envelope::force_refresh(reason));
    }

    /// Sends `envelope` to every session matching `durable_key`, regardless
    /// of filter (control-plane messages are always-sent types). Returns the
    /// count of sessions notified.
    pub fn push_to_key(&self, durable_key: &str, envelope: Envelope) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let mut notified = 0;
        sessions.retain(|_, session| {
            if session.durable_key != durable_key {
                return true;
            }
            match session.sender.send(envelope.clone()) {
                Ok(()) => {
                    notified += 1;
                    true
                }
                Err(_) => false,
            }
        });
        notified
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, session)| SessionSummary {
                session_id: *id,
                remote_addr: session.remote_addr.clone(),
                durable_key: session.durable_key.clone(),
                filter: session.filter.clone(),
                last_seen: session.last_seen,
            })
            .collect()
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}

fn results_race_id(envelope: &Envelope) -> Option<String> {
    if envelope.kind != EnvelopeType::Results {
        return None;
    }
    envelope.data.get("raceId").and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_assigns_sequential_session_ids() {
        let hub = SubscriberHub::new();
        let (id1, _rx1) = hub.connect("127.0.0.1:1".to_string(), "k1".to_string());
        let (id2, _rx2) = hub.connect("127.0.0.1:2".to_string(), "k2".to_string());
        assert_eq!(id2, id1 + 1);
    }

    #[test]
    fn broadcast_respects_per_session_filter() {
        let hub = SubscriberHub::new();
        let (id, mut rx) = hub.connect("127.0.0.1:1".to_string(), "k1".to_string());
        hub.set_filter(
            id,
            SubscriberFilter {
                show_on_course: false,
                ..Default::default()
            },
        );

        hub.broadcast(Envelope::on_course(&[]));
        assert!(rx.try_recv().is_err());

        hub.broadcast(Envelope::time_of_day(Some("10:00:00".to_string())));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn broadcast_suppresses_results_outside_race_filter() {
        let hub = SubscriberHub::new();
        let (id, mut rx) = hub.connect("127.0.0.1:1".to_string(), "k1".to_string());
        hub.set_filter(
            id,
            SubscriberFilter {
                race_filter: Some(["K1M_ST_BR2_6".to_string()].into_iter().collect()),
                ..Default::default()
            },
        );

        let envelope = Envelope::new(EnvelopeType::Results, serde_json::json!({ "raceId": "C1M_ST_BR1_3" }));
        hub.broadcast(envelope);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dead_session_is_dropped_on_next_broadcast() {
        let hub = SubscriberHub::new();
        let (id, rx) = hub.connect("127.0.0.1:1".to_string(), "k1".to_string());
        drop(rx);

        hub.broadcast(Envelope::time_of_day(None));
        assert_eq!(hub.session_count(), 0);
        assert!(hub.durable_key(id).is_none());
    }

    #[test]
    fn push_to_key_notifies_only_matching_sessions_and_counts_them() {
        let hub = SubscriberHub::new();
        let (_id1, mut rx1) = hub.connect("127.0.0.1:1".to_string(), "shared".to_string());
        let (_id2, mut rx2) = hub.connect("127.0.0.1:2".to_string(), "shared".to_string());
        let (_id3, mut rx3) = hub.connect("127.0.0.1:3".to_string(), "other".to_string());

        let notified = hub.push_to_key("shared", Envelope::config_push(serde_json::json!({})));
        assert_eq!(notified, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }
}
