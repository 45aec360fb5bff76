//! `DecodedRecord` and its variant payloads (§3.1).

use serde::{Deserialize, Serialize};

/// One competitor on a single `OnCourse` emission.
///
/// `gates` is a CSV of nullable small ints as supplied by the engine, kept
/// verbatim — it's display data, not something the gateway computes over.
/// `rank = 0` means "no rank", distinct from absent; it is never coerced to
/// `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnCourseCompetitor {
    pub bib: String,
    pub name: String,
    pub club: String,
    pub nat: String,
    pub race_id: String,
    pub race_name: String,
    pub start_order: i64,
    pub gates: String,
    pub completed: bool,
    pub dt_start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt_finish: Option<String>,
    pub pen: i64,
    pub time: String,
    pub total: String,
    pub ttb_diff: String,
    pub ttb_name: String,
    pub rank: i64,
    pub position: u32,
}

/// One row of a `Results` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub rank: i64,
    pub bib: String,
    pub name: String,
    pub given_name: String,
    pub family_name: String,
    pub club: String,
    pub nat: String,
    pub start_order: i64,
    pub start_time: String,
    pub gates: String,
    pub pen: i64,
    pub time: String,
    pub total: String,
    pub behind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// One entry of a `Schedule` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRace {
    pub race_id: String,
    pub class_id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
}

/// `RaceConfig` attributes-only payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceConfigPayload {
    pub nr_splits: i64,
    pub nr_gates: i64,
    pub gate_config: String,
    pub gate_captions: String,
}

/// `Results` record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsPayload {
    pub race_id: String,
    pub class_id: String,
    pub is_current: bool,
    pub main_title: String,
    pub sub_title: String,
    pub rows: Vec<ResultRow>,
}

/// `Schedule` record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePayload {
    pub races: Vec<ScheduledRace>,
}

/// `OnCourse` record payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnCoursePayload {
    pub competitors: Vec<OnCourseCompetitor>,
}

/// A single decoded engine record — the output of `XmlDecoder`, the input
/// to `EventState` (C7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecodedRecord {
    TimeOfDay(Option<String>),
    OnCourse(OnCoursePayload),
    Results(ResultsPayload),
    RaceConfig(RaceConfigPayload),
    Schedule(SchedulePayload),
    /// Kept for visibility only — never applied to `EventState`.
    Unknown { element: String },
}
