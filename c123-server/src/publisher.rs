//! External publisher (§5): forwards selected envelopes to a configured
//! HTTP sink. `XmlChange` and per-race `Results` are debounced (trailing
//! quiet period), `OnCourse` is throttled (rate-limited, excess dropped).
//! A circuit breaker opens after repeated failures, grounded on the
//! teacher's reqwest-client shape (`reqwest::Client` + `.post().json()`)
//! generalized with retry/backoff bookkeeping in the style of `TcpSource`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use c123_protocol::{
    CIRCUIT_BREAKER_FAILURE_THRESHOLD, CIRCUIT_BREAKER_OPEN_DURATION, PUBLISHER_ON_COURSE_MIN_INTERVAL,
    PUBLISHER_RESULTS_DEBOUNCE, PUBLISHER_XML_CHANGE_DEBOUNCE,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cancel::CancelToken;

#[derive(Debug, Clone)]
pub enum PublishEvent {
    XmlChange { sections: Vec<String>, checksum: String },
    OnCourse { payload: Value },
    Results { race_id: String, payload: Value },
}

struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    fn is_open(&self) -> bool {
        let mut opened_at = self.opened_at.lock().unwrap();
        match *opened_at {
            Some(t) if t.elapsed() < CIRCUIT_BREAKER_OPEN_DURATION => true,
            Some(_) => {
                *opened_at = None;
                false
            }
            None => false,
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.opened_at.lock().unwrap() = None;
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= CIRCUIT_BREAKER_FAILURE_THRESHOLD {
            *self.opened_at.lock().unwrap() = Some(Instant::now());
        }
    }
}

struct PendingResults {
    payload: Value,
    deadline: Instant,
}

pub struct ExternalPublisher {
    client: reqwest::Client,
    target_url: String,
    breaker: CircuitBreaker,
    cancel: CancelToken,
}

impl ExternalPublisher {
    pub fn new(target_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            target_url,
            breaker: CircuitBreaker::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(self, mut events: mpsc::Receiver<PublishEvent>) {
        let mut pending_xml_change: Option<(Vec<String>, String, Instant)> = None;
        let mut pending_results: HashMap<String, PendingResults> = HashMap::new();
        let mut last_on_course_sent: Option<Instant> = None;
        let mut tick = tokio::time::interval(Duration::from_millis(100));

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { return };
                    match event {
                        PublishEvent::XmlChange { sections, checksum } => {
                            pending_xml_change = Some((sections, checksum, Instant::now() + PUBLISHER_XML_CHANGE_DEBOUNCE));
                        }
                        PublishEvent::Results { race_id, payload } => {
                            pending_results.insert(race_id, PendingResults {
                                payload,
                                deadline: Instant::now() + PUBLISHER_RESULTS_DEBOUNCE,
                            });
                        }
                        PublishEvent::OnCourse { payload } => {
                            let allowed = last_on_course_sent
                                .map(|t| t.elapsed() >= PUBLISHER_ON_COURSE_MIN_INTERVAL)
                                .unwrap_or(true);
                            if allowed {
                                last_on_course_sent = Some(Instant::now());
                                self.send("onCourse", &payload).await;
                            }
                        }
                    }
                }
                _ = tick.tick() => {
                    if let Some((sections, checksum, deadline)) = pending_xml_change.clone() {
                        if Instant::now() >= deadline {
                            pending_xml_change = None;
                            self.send("xmlChange", &serde_json::json!({ "sections": sections, "checksum": checksum })).await;
                        }
                    }

                    let ready: Vec<String> = pending_results
                        .iter()
                        .filter(|(_, p)| Instant::now() >= p.deadline)
                        .map(|(race_id, _)| race_id.clone())
                        .collect();
                    for race_id in ready {
                        if let Some(entry) = pending_results.remove(&race_id) {
                            self.send("results", &entry.payload).await;
                        }
                    }
                }
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    async fn send(&self, kind: &str, payload: &Value) {
        if self.breaker.is_open() {
            warn!(kind, "external publisher circuit open, dropping publish");
            return;
        }

        let body = serde_json::json!({ "kind": kind, "data": payload });
        match self.client.post(&self.target_url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                self.breaker.record_success();
                info!(kind, "published to external sink");
            }
            Ok(response) => {
                self.breaker.record_failure();
                warn!(kind, status = %response.status(), "external publish rejected");
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(kind, error = %e, "external publish failed");
            }
        }
    }
}
