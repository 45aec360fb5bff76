//! # c123-contracts
//!
//! Shared wire contracts for the Canoe123 live-timing gateway: the push
//! channel [`Envelope`], subscriber [`SubscriberFilter`], persisted
//! [`ClientConfig`], and the [`EventSnapshot`] shape served over REST.

use std::collections::{BTreeMap, HashSet};

use c123_decode::{OnCourseCompetitor, RaceConfigPayload, ResultsPayload, SchedulePayload};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const ENVELOPE_CONTRACT_VERSION_V1: &str = "c123_push_envelope.v1";
pub const WS_PATH: &str = "/ws";

/// Every value carried as an [`Envelope`]'s `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeType {
    TimeOfDay,
    OnCourse,
    Results,
    RaceConfig,
    Schedule,
    Connected,
    Error,
    XmlChange,
    ForceRefresh,
    ConfigPush,
    LogEntry,
}

impl EnvelopeType {
    /// Always delivered regardless of a subscriber's filter (§4.9).
    pub fn always_sent(self) -> bool {
        matches!(
            self,
            EnvelopeType::TimeOfDay
                | EnvelopeType::Connected
                | EnvelopeType::Error
                | EnvelopeType::XmlChange
                | EnvelopeType::ForceRefresh
                | EnvelopeType::ConfigPush
        )
    }
}

/// The JSON wrapper carrying one message on the push channel:
/// `{ type, timestamp, data }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: EnvelopeType, data: Value) -> Self {
        Self {
            kind,
            timestamp: chrono::Utc::now(),
            data,
        }
    }

    pub fn time_of_day(time: Option<String>) -> Self {
        Self::new(EnvelopeType::TimeOfDay, serde_json::json!(time))
    }

    pub fn on_course(competitors: &[OnCourseCompetitor]) -> Self {
        Self::new(
            EnvelopeType::OnCourse,
            serde_json::json!({ "competitors": competitors }),
        )
    }

    pub fn results(results: &ResultsPayload) -> Self {
        Self::new(EnvelopeType::Results, serde_json::to_value(results).unwrap())
    }

    pub fn race_config(config: &RaceConfigPayload) -> Self {
        Self::new(EnvelopeType::RaceConfig, serde_json::to_value(config).unwrap())
    }

    pub fn schedule(schedule: &SchedulePayload) -> Self {
        Self::new(EnvelopeType::Schedule, serde_json::to_value(schedule).unwrap())
    }

    pub fn connected(session_id: u64) -> Self {
        Self::new(
            EnvelopeType::Connected,
            serde_json::json!({ "sessionId": session_id }),
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EnvelopeType::Error, serde_json::json!({ "message": message.into() }))
    }

    pub fn xml_change(sections: &[String], checksum: &str) -> Self {
        Self::new(
            EnvelopeType::XmlChange,
            serde_json::json!({ "sections": sections, "checksum": checksum }),
        )
    }

    pub fn force_refresh(reason: Option<String>) -> Self {
        Self::new(EnvelopeType::ForceRefresh, serde_json::json!({ "reason": reason }))
    }

    pub fn config_push(data: Value) -> Self {
        Self::new(EnvelopeType::ConfigPush, data)
    }

    pub fn log_entry(data: Value) -> Self {
        Self::new(EnvelopeType::LogEntry, data)
    }
}

/// The only recognized message a subscriber may send back over the push
/// channel. Anything else is ignored (§4.9).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    ClientState { data: Value },
}

/// Per-session delivery filter (§3.1). `race_filter: None` means "all races".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub race_filter: Option<HashSet<String>>,
    #[serde(default = "default_true")]
    pub show_on_course: bool,
    #[serde(default = "default_true")]
    pub show_results: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SubscriberFilter {
    fn default() -> Self {
        Self {
            race_filter: None,
            show_on_course: true,
            show_results: true,
        }
    }
}

impl SubscriberFilter {
    /// `true` if an envelope of this type should be delivered under this
    /// filter. `results_race_id` is only consulted for `Results` envelopes.
    pub fn admits(&self, kind: EnvelopeType, results_race_id: Option<&str>) -> bool {
        if kind.always_sent() {
            return true;
        }
        match kind {
            EnvelopeType::OnCourse => self.show_on_course,
            EnvelopeType::Results => {
                if !self.show_results {
                    return false;
                }
                match (&self.race_filter, results_race_id) {
                    (Some(allowed), Some(race_id)) => allowed.contains(race_id),
                    (Some(_), None) => false,
                    (None, _) => true,
                }
            }
            _ => true,
        }
    }
}

/// Static display assets overridable per client (§3.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer_image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutType {
    Vertical,
    Ledwall,
}

/// Persistent per-client configuration, keyed by durable key or IP fallback
/// (§3.1). Every field is optional on the wire: a `None` field is "leave
/// alone" on a partial update and "not set" when read back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_type: Option<LayoutType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_rows: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub race_filter: Option<HashSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_on_course: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_results: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub custom_params: std::collections::BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<ClientAssets>,
}

impl ClientConfig {
    pub fn is_empty(&self) -> bool {
        self.layout_type.is_none()
            && self.display_rows.is_none()
            && self.custom_title.is_none()
            && self.race_filter.is_none()
            && self.show_on_course.is_none()
            && self.show_results.is_none()
            && self.label.is_none()
            && self.last_seen.is_none()
            && self.durable_client_id.is_none()
            && self.custom_params.is_empty()
            && self.assets.is_none()
    }

    /// Field-by-field merge of a partial update over `self`. Per-field,
    /// `patch`'s three wire states each mean something different: key
    /// omitted leaves the field alone, key present with `null` clears it,
    /// key present with a value sets it (§3.1's merge invariant).
    /// `customParams` merges by sub-key rather than replacing wholesale
    /// (§4.10).
    pub fn merge(&mut self, patch: ClientConfigPatch) {
        if let Some(v) = patch.layout_type {
            self.layout_type = v;
        }
        if let Some(v) = patch.display_rows {
            self.display_rows = v;
        }
        if let Some(v) = patch.custom_title {
            self.custom_title = v;
        }
        if let Some(v) = patch.race_filter {
            self.race_filter = v;
        }
        if let Some(v) = patch.show_on_course {
            self.show_on_course = v;
        }
        if let Some(v) = patch.show_results {
            self.show_results = v;
        }
        if let Some(v) = patch.label {
            self.label = v;
        }
        if let Some(v) = patch.last_seen {
            self.last_seen = v;
        }
        if let Some(v) = patch.durable_client_id {
            self.durable_client_id = v;
        }
        for (k, v) in patch.custom_params {
            self.custom_params.insert(k, v);
        }
        if let Some(v) = patch.assets {
            self.assets = v;
        }
    }

    /// The subset actually pushed to a subscriber: only non-null fields
    /// (§4.9 S4, invariant 8).
    pub fn to_config_push_data(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Default::default()))
    }
}

/// Deserializes a present-but-possibly-null field as `Some(value)`, leaving
/// an omitted field as `None` via `#[serde(default)]` on the call site —
/// the standard "double option" trick for distinguishing absence from null.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Wire shape of a partial `ClientConfig` update (`PUT/POST .../clients/:key`).
/// Unlike `ClientConfig` itself, every field is a double `Option`: `None`
/// (key omitted) means "leave alone", `Some(None)` (key present, `null`)
/// means "clear", `Some(Some(v))` means "set to `v`" (§3.1, §4.10).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub layout_type: Option<Option<LayoutType>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub display_rows: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub custom_title: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub race_filter: Option<Option<HashSet<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub show_on_course: Option<Option<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub show_results: Option<Option<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub label: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub last_seen: Option<Option<chrono::DateTime<chrono::Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub durable_client_id: Option<Option<String>>,
    #[serde(default)]
    pub custom_params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_some")]
    pub assets: Option<Option<ClientAssets>>,
}

impl ClientConfigPatch {
    pub fn label(label: String) -> Self {
        Self {
            label: Some(Some(label)),
            ..Default::default()
        }
    }

    pub fn last_seen_now() -> Self {
        Self {
            last_seen: Some(Some(chrono::Utc::now())),
            ..Default::default()
        }
    }
}

/// The aggregated, versioned event state served to new subscribers via REST
/// projections and broadcast incrementally over the push channel (§3.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    pub current_race_id: Option<String>,
    pub on_course: Vec<OnCourseCompetitor>,
    pub results: Option<ResultsPayload>,
    pub schedule: Option<SchedulePayload>,
    pub race_config: Option<RaceConfigPayload>,
    pub time_of_day: Option<String>,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_always_admits_control_messages() {
        let filter = SubscriberFilter {
            show_on_course: false,
            show_results: false,
            ..Default::default()
        };
        assert!(filter.admits(EnvelopeType::TimeOfDay, None));
        assert!(filter.admits(EnvelopeType::ConfigPush, None));
    }

    #[test]
    fn filter_suppresses_on_course_when_disabled() {
        let filter = SubscriberFilter {
            show_on_course: false,
            ..Default::default()
        };
        assert!(!filter.admits(EnvelopeType::OnCourse, None));
    }

    #[test]
    fn filter_suppresses_results_outside_race_filter() {
        let filter = SubscriberFilter {
            race_filter: Some(["K1M_ST_BR2_6".to_string()].into_iter().collect()),
            ..Default::default()
        };
        assert!(filter.admits(EnvelopeType::Results, Some("K1M_ST_BR2_6")));
        assert!(!filter.admits(EnvelopeType::Results, Some("C1M_ST_BR1_3")));
    }

    #[test]
    fn client_config_merge_is_field_wise_and_custom_params_merge_by_key() {
        let mut base = ClientConfig {
            layout_type: Some(LayoutType::Vertical),
            display_rows: Some(5),
            ..Default::default()
        };
        base.custom_params
            .insert("sponsor".to_string(), Value::String("acme".into()));

        let mut patch = ClientConfigPatch {
            display_rows: Some(Some(10)),
            ..Default::default()
        };
        patch
            .custom_params
            .insert("tagline".to_string(), Value::String("go fast".into()));

        base.merge(patch);

        assert_eq!(base.layout_type, Some(LayoutType::Vertical));
        assert_eq!(base.display_rows, Some(10));
        assert_eq!(base.custom_params.len(), 2);
    }

    #[test]
    fn client_config_merge_omitted_field_leaves_value_alone() {
        let mut base = ClientConfig {
            custom_title: Some("Finish".to_string()),
            ..Default::default()
        };
        let patch: ClientConfigPatch = serde_json::from_value(serde_json::json!({})).unwrap();
        base.merge(patch);
        assert_eq!(base.custom_title, Some("Finish".to_string()));
    }

    #[test]
    fn client_config_merge_explicit_null_clears_value() {
        let mut base = ClientConfig {
            custom_title: Some("Finish".to_string()),
            ..Default::default()
        };
        let patch: ClientConfigPatch = serde_json::from_value(serde_json::json!({ "customTitle": null })).unwrap();
        base.merge(patch);
        assert_eq!(base.custom_title, None);
    }

    #[test]
    fn config_push_omits_null_fields() {
        let mut cfg = ClientConfig::default();
        cfg.layout_type = Some(LayoutType::Ledwall);
        cfg.display_rows = Some(10);
        let data = cfg.to_config_push_data();
        let obj = data.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("layoutType"));
        assert!(obj.contains_key("displayRows"));
    }
}
