//! `XmlDatabase` (C8): a cached, mtime-keyed view over the engine's shared
//! XML file, exposing read-only projections (§4.7). A single lock covers
//! the mtime check and rebuild so every projection invalidates atomically.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use c123_decode::{Element, ResultRow, parse_document};
use c123_protocol::{RUN_BR1, RUN_BR2, UNASSIGNED_RACE_SENTINEL};
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub id: String,
    pub class_id: String,
    pub bib: String,
    pub name: String,
    pub club: String,
    pub nat: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub race_id: String,
    pub class_id: String,
    pub description: String,
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceSummary {
    pub race_id: String,
    pub class_id: String,
    pub description: String,
    pub start_time: Option<String>,
    pub participant_count: usize,
    pub has_results: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceDetail {
    pub race_id: String,
    pub class_id: String,
    pub description: String,
    pub sibling_race_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartlistEntry {
    pub bib: String,
    pub name: String,
    pub club: String,
    pub nat: String,
    pub start_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultWithParticipant {
    pub participant: Option<ParticipantRecord>,
    pub row: ResultRow,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedResultRow {
    pub participant_id: String,
    pub participant: Option<ParticipantRecord>,
    pub run1_total: Option<String>,
    pub run2_total: Option<String>,
    pub best_total: Option<f64>,
    pub best_rank: Option<u32>,
}

#[derive(Debug, Clone, Default)]
struct Projections {
    participants: Vec<ParticipantRecord>,
    schedule_all: Vec<ScheduleEntry>,
    results_by_race: HashMap<String, Vec<ResultRow>>,
    classes: Vec<String>,
}

struct Cache {
    mtime: Option<SystemTime>,
    projections: Projections,
}

/// Errors are "not available", not fatal: every accessor returns an
/// `Option`/empty collection when the file is missing (§4.7).
pub struct XmlDatabase {
    path: PathBuf,
    cache: RwLock<Cache>,
}

impl XmlDatabase {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: RwLock::new(Cache {
                mtime: None,
                projections: Projections::default(),
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        self.path.exists()
    }

    async fn refresh(&self) {
        let mtime = std::fs::metadata(&self.path).ok().and_then(|m| m.modified().ok());

        {
            let cache = self.cache.read().await;
            if cache.mtime == mtime && mtime.is_some() {
                return;
            }
        }

        let projections = match std::fs::read_to_string(&self.path) {
            Ok(content) => parse_db(&content).unwrap_or_default(),
            Err(_) => Projections::default(),
        };

        let mut cache = self.cache.write().await;
        cache.mtime = mtime;
        cache.projections = projections;
    }

    pub async fn participants(&self) -> Vec<ParticipantRecord> {
        self.refresh().await;
        self.cache.read().await.projections.participants.clone()
    }

    /// Filtered to entries whose `raceId` does not contain the "unassigned"
    /// sentinel.
    pub async fn schedule(&self) -> Vec<ScheduleEntry> {
        self.refresh().await;
        self.cache
            .read()
            .await
            .projections
            .schedule_all
            .iter()
            .filter(|e| !e.race_id.contains(UNASSIGNED_RACE_SENTINEL))
            .cloned()
            .collect()
    }

    pub async fn races(&self) -> Vec<RaceSummary> {
        self.refresh().await;
        let cache = self.cache.read().await;
        let participant_counts = participant_counts_by_class(&cache.projections.participants);

        cache
            .projections
            .schedule_all
            .iter()
            .filter(|e| !e.race_id.contains(UNASSIGNED_RACE_SENTINEL))
            .map(|entry| RaceSummary {
                race_id: entry.race_id.clone(),
                class_id: entry.class_id.clone(),
                description: entry.description.clone(),
                start_time: entry.start_time.clone(),
                participant_count: participant_counts.get(entry.class_id.as_str()).copied().unwrap_or(0),
                has_results: cache.projections.results_by_race.contains_key(&entry.race_id),
            })
            .collect()
    }

    pub async fn race_detail(&self, race_id: &str) -> Option<RaceDetail> {
        self.refresh().await;
        let cache = self.cache.read().await;
        let entry = cache.projections.schedule_all.iter().find(|e| e.race_id == race_id)?;

        let siblings = cache
            .projections
            .schedule_all
            .iter()
            .filter(|e| e.class_id == entry.class_id && e.race_id != race_id)
            .map(|e| e.race_id.clone())
            .collect();

        Some(RaceDetail {
            race_id: entry.race_id.clone(),
            class_id: entry.class_id.clone(),
            description: entry.description.clone(),
            sibling_race_ids: siblings,
        })
    }

    /// From results if present (sorted by startOrder) else from participants
    /// sorted numerically by bib (§4.7).
    pub async fn startlist(&self, race_id: &str) -> Vec<StartlistEntry> {
        self.refresh().await;
        let cache = self.cache.read().await;

        if let Some(rows) = cache.projections.results_by_race.get(race_id) {
            let mut entries: Vec<StartlistEntry> = rows
                .iter()
                .map(|r| StartlistEntry {
                    bib: r.bib.clone(),
                    name: r.name.clone(),
                    club: r.club.clone(),
                    nat: r.nat.clone(),
                    start_order: r.start_order,
                })
                .collect();
            entries.sort_by_key(|e| e.start_order);
            return entries;
        }

        let Some(entry) = cache.projections.schedule_all.iter().find(|e| e.race_id == race_id) else {
            return Vec::new();
        };

        let mut entries: Vec<StartlistEntry> = cache
            .projections
            .participants
            .iter()
            .filter(|p| p.class_id == entry.class_id)
            .map(|p| StartlistEntry {
                bib: p.bib.clone(),
                name: p.name.clone(),
                club: p.club.clone(),
                nat: p.nat.clone(),
                start_order: 0,
            })
            .collect();
        entries.sort_by_key(|e| e.bib.parse::<i64>().unwrap_or(i64::MAX));
        entries
    }

    /// Results sorted by rank asc (999 for absent) joined with participants.
    pub async fn results_with_participants(&self, race_id: &str) -> Vec<ResultWithParticipant> {
        self.refresh().await;
        let cache = self.cache.read().await;
        let Some(rows) = cache.projections.results_by_race.get(race_id) else {
            return Vec::new();
        };

        let by_bib: HashMap<&str, &ParticipantRecord> = cache
            .projections
            .participants
            .iter()
            .map(|p| (p.bib.as_str(), p))
            .collect();

        let mut out: Vec<ResultWithParticipant> = rows
            .iter()
            .map(|row| ResultWithParticipant {
                participant: by_bib.get(row.bib.as_str()).map(|p| (*p).clone()),
                row: row.clone(),
            })
            .collect();

        out.sort_by_key(|r| if r.row.rank == 0 { 999 } else { r.row.rank as i32 });
        out
    }

    /// Resolves the raceId of `classId`'s `run` heat (`BR1`/`BR2`) by
    /// scanning the schedule for a raceId carrying that run as one of its
    /// `_`-separated tokens (real raceIds look like `K1M_ST_BR1_6`, not
    /// `{classId}_{run}`, §6).
    pub async fn race_id_for_run(&self, class_id: &str, run: &str) -> Option<String> {
        self.refresh().await;
        let cache = self.cache.read().await;
        find_race_id_for_run(&cache.projections.schedule_all, class_id, run).map(str::to_string)
    }

    /// Left-outer-merges `BR1` and `BR2` runs for a class by participant
    /// bib, computing `bestTotal` over defined totals only (§4.7).
    pub async fn merged_results(&self, class_id: &str) -> Vec<MergedResultRow> {
        self.refresh().await;
        let cache = self.cache.read().await;

        let run1_id = find_race_id_for_run(&cache.projections.schedule_all, class_id, RUN_BR1);
        let run2_id = find_race_id_for_run(&cache.projections.schedule_all, class_id, RUN_BR2);

        let run1 = totals_by_bib(run1_id.and_then(|id| cache.projections.results_by_race.get(id)));
        let run2 = totals_by_bib(run2_id.and_then(|id| cache.projections.results_by_race.get(id)));

        let by_bib: HashMap<&str, &ParticipantRecord> = cache
            .projections
            .participants
            .iter()
            .filter(|p| p.class_id == class_id)
            .map(|p| (p.bib.as_str(), p))
            .collect();

        let mut bibs: Vec<&str> = by_bib.keys().copied().collect();
        bibs.sort();

        let mut rows: Vec<MergedResultRow> = bibs
            .into_iter()
            .map(|bib| {
                let run1_total = run1.get(bib).map(|(s, _)| s.clone());
                let run2_total = run2.get(bib).map(|(s, _)| s.clone());
                let best = [run1.get(bib), run2.get(bib)]
                    .into_iter()
                    .flatten()
                    .map(|(_, v)| *v)
                    .fold(None, |acc: Option<f64>, v| match acc {
                        Some(a) => Some(a.min(v)),
                        None => Some(v),
                    });

                MergedResultRow {
                    participant_id: bib.to_string(),
                    participant: by_bib.get(bib).map(|p| (*p).clone()),
                    run1_total,
                    run2_total,
                    best_total: best,
                    best_rank: None,
                }
            })
            .collect();

        rows.sort_by(|a, b| match (a.best_total, b.best_total) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap().then(a.participant_id.cmp(&b.participant_id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.participant_id.cmp(&b.participant_id),
        });

        let mut next_rank = 1u32;
        for row in rows.iter_mut() {
            if row.best_total.is_some() {
                row.best_rank = Some(next_rank);
                next_rank += 1;
            }
        }

        rows
    }
}

/// Finds `classId`'s raceId whose `_`-separated tokens include `run`
/// verbatim (e.g. `run="BR1"` matches `K1M_ST_BR1_6`).
fn find_race_id_for_run<'a>(schedule: &'a [ScheduleEntry], class_id: &str, run: &str) -> Option<&'a str> {
    schedule
        .iter()
        .find(|e| e.class_id == class_id && e.race_id.split('_').any(|token| token == run))
        .map(|e| e.race_id.as_str())
}

fn totals_by_bib(rows: Option<&Vec<ResultRow>>) -> HashMap<&str, (String, f64)> {
    rows.map(|rows| {
        rows.iter()
            .filter_map(|r| r.total.parse::<f64>().ok().map(|v| (r.bib.as_str(), (r.total.clone(), v))))
            .collect()
    })
    .unwrap_or_default()
}

fn participant_counts_by_class(participants: &[ParticipantRecord]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for p in participants {
        *counts.entry(p.class_id.as_str()).or_insert(0) += 1;
    }
    counts
}

fn parse_db(xml: &str) -> Result<Projections, c123_decode::DecodeError> {
    let root = parse_document(xml)?;

    let participants = root
        .child("Participants")
        .map(|section| {
            section
                .children_named("Participant")
                .map(|p| ParticipantRecord {
                    id: p.attr_trimmed("ID"),
                    class_id: p.attr_trimmed("ClassID"),
                    bib: p.attr_trimmed("Bib"),
                    name: p.attr_trimmed("Name"),
                    club: p.attr_trimmed("Club"),
                    nat: p.attr_trimmed("Nat"),
                })
                .collect()
        })
        .unwrap_or_default();

    let schedule_all = root
        .child("Schedule")
        .map(|section| {
            section
                .children_named("Race")
                .map(|race| ScheduleEntry {
                    race_id: race.attr_trimmed("RaceID"),
                    class_id: race.attr_trimmed("ClassID"),
                    description: race.attr_trimmed("Description"),
                    start_time: race
                        .child("StartTime")
                        .map(|s| s.text_trimmed().to_string())
                        .filter(|s| !s.is_empty()),
                })
                .collect()
        })
        .unwrap_or_default();

    let results_by_race = root
        .child("Results")
        .map(|section| {
            section
                .children_named("Race")
                .map(|race| (race.attr_trimmed("RaceID"), decode_db_rows(race)))
                .collect()
        })
        .unwrap_or_default();

    let classes = root
        .child("Classes")
        .map(|section| section.children_named("Class").map(|c| c.attr_trimmed("ID")).collect())
        .unwrap_or_default();

    Ok(Projections {
        participants,
        schedule_all,
        results_by_race,
        classes,
    })
}

fn decode_db_rows(race: &Element) -> Vec<ResultRow> {
    let mut rows: Vec<ResultRow> = race.children_named("Row").map(decode_db_row).collect();
    rows.sort_by_key(|r| (if r.rank == 0 { i64::MAX } else { r.rank }, r.start_order));
    rows
}

fn decode_db_row(row: &Element) -> ResultRow {
    let participant = row.child("Participant");
    let result = row
        .children_named("Result")
        .find(|r| r.attr("Type") == Some("T"))
        .or_else(|| row.children_named("Result").next());
    let row_number = row.attr_i64("Number").unwrap_or(0);

    let rank = result
        .and_then(|r| r.attr_i64("Rank"))
        .filter(|&r| r != 0)
        .unwrap_or(row_number);

    ResultRow {
        rank,
        bib: participant.map(|p| p.attr_trimmed("Bib")).unwrap_or_default(),
        name: participant.map(|p| p.attr_trimmed("Name")).unwrap_or_default(),
        given_name: participant.map(|p| p.attr_trimmed("GivenName")).unwrap_or_default(),
        family_name: participant.map(|p| p.attr_trimmed("FamilyName")).unwrap_or_default(),
        club: participant.map(|p| p.attr_trimmed("Club")).unwrap_or_default(),
        nat: participant.map(|p| p.attr_trimmed("Nat")).unwrap_or_default(),
        start_order: participant.and_then(|p| p.attr_i64("StartOrder")).unwrap_or(0),
        start_time: participant.map(|p| p.attr_trimmed("StartTime")).unwrap_or_default(),
        gates: result.map(|r| r.attr_trimmed("Gates")).unwrap_or_default(),
        pen: result.and_then(|r| r.attr_i64("Pen")).unwrap_or(0),
        time: result.map(|r| r.attr_trimmed("Time")).unwrap_or_default(),
        total: result.map(|r| r.attr_trimmed("Total")).unwrap_or_default(),
        behind: result.map(|r| r.attr_trimmed("Behind")).unwrap_or_default(),
        status: result.map(|r| r.attr_trimmed("Status")).filter(|s| !s.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_db(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("db.xml");
        std::fs::write(&path, content).unwrap();
        path
    }

    const SAMPLE: &str = r#"<Canoe123Data MainTitle="Test Cup" CompetitionCode="TC26">
        <Participants>
            <Participant ID="p1" ClassID="K1M" Bib="9" Name="A Paddler" Club="CluA" Nat="GER"/>
            <Participant ID="p2" ClassID="K1M" Bib="10" Name="B Paddler" Club="CluB" Nat="FRA"/>
        </Participants>
        <Schedule>
            <Race RaceID="K1M_ST_BR1_6" ClassID="K1M" Description="Run 1"><StartTime>10:00:00</StartTime></Race>
            <Race RaceID="K1M_ST_BR2_6" ClassID="K1M" Description="Run 2"><StartTime>11:00:00</StartTime></Race>
            <Race RaceID="K1M_unassigned_1" ClassID="K1M" Description="TBD"/>
        </Schedule>
        <Results>
            <Race RaceID="K1M_ST_BR1_6">
                <Row Number="1"><Participant Bib="9" StartOrder="1"/><Result Type="T" Rank="1" Total="90.00"/></Row>
                <Row Number="2"><Participant Bib="10" StartOrder="2"/><Result Type="T" Rank="0" Total=""/></Row>
            </Race>
            <Race RaceID="K1M_ST_BR2_6">
                <Row Number="1"><Participant Bib="9" StartOrder="1"/><Result Type="T" Rank="2" Total="91.20"/></Row>
                <Row Number="2"><Participant Bib="10" StartOrder="2"/><Result Type="T" Rank="1" Total="95.50"/></Row>
            </Race>
        </Results>
        <Classes><Class ID="K1M" Name="Kayak Men"/></Classes>
    </Canoe123Data>"#;

    #[tokio::test]
    async fn schedule_filters_unassigned_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_db(&dir, SAMPLE);
        let db = XmlDatabase::new(path);
        let schedule = db.schedule().await;
        assert_eq!(schedule.len(), 2);
        assert!(schedule.iter().all(|e| !e.race_id.contains("unassigned")));
    }

    #[tokio::test]
    async fn races_reports_participant_counts_and_has_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_db(&dir, SAMPLE);
        let db = XmlDatabase::new(path);
        let races = db.races().await;
        assert_eq!(races.len(), 2);
        assert!(races.iter().all(|r| r.participant_count == 2));
        assert!(races.iter().all(|r| r.has_results));
    }

    #[tokio::test]
    async fn startlist_prefers_results_sorted_by_start_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_db(&dir, SAMPLE);
        let db = XmlDatabase::new(path);
        let startlist = db.startlist("K1M_ST_BR1_6").await;
        assert_eq!(startlist.len(), 2);
        assert_eq!(startlist[0].bib, "9");
    }

    #[tokio::test]
    async fn merged_results_computes_best_total_and_rank() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_db(&dir, SAMPLE);
        let db = XmlDatabase::new(path);
        let merged = db.merged_results("K1M").await;

        let p1 = merged.iter().find(|r| r.participant_id == "9").unwrap();
        assert_eq!(p1.best_total, Some(90.00));
        assert_eq!(p1.best_rank, Some(1));

        let p2 = merged.iter().find(|r| r.participant_id == "10").unwrap();
        assert_eq!(p2.best_total, Some(95.50));
        assert_eq!(p2.best_rank, Some(2));
    }

    #[tokio::test]
    async fn missing_file_yields_empty_projections_not_a_panic() {
        let db = XmlDatabase::new(PathBuf::from("/nonexistent/db.xml"));
        assert!(db.participants().await.is_empty());
        assert!(db.schedule().await.is_empty());
        assert!(!db.is_available());
    }

    #[tokio::test]
    async fn cache_hits_when_mtime_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_db(&dir, SAMPLE);
        let db = XmlDatabase::new(path);

        let _ = db.participants().await;
        let mtime_after_first = db.cache.read().await.mtime;
        let _ = db.schedule().await;
        let mtime_after_second = db.cache.read().await.mtime;

        assert_eq!(mtime_after_first, mtime_after_second);
    }
}
