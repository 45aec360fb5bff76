//! `EventState` (C7): the single-writer aggregator reducing decoded records
//! from every source into one versioned `EventSnapshot`, grounded on the
//! teacher's `RaceEngine` (owned mutable state + broadcast-on-change).

use std::sync::Arc;

use c123_contracts::EventSnapshot;
use c123_decode::DecodedRecord;
use tokio::sync::broadcast;
use tracing::warn;

/// Reduces a stream of `DecodedRecord`s into `EventSnapshot`. Owned by a
/// single task; never blocks on I/O (§5) — callers hand it records and it
/// synchronously folds them and broadcasts the result.
pub struct EventState {
    snapshot: EventSnapshot,
    change_tx: broadcast::Sender<Arc<EventSnapshot>>,
}

impl EventState {
    pub fn new(change_tx: broadcast::Sender<Arc<EventSnapshot>>) -> Self {
        Self {
            snapshot: EventSnapshot::default(),
            change_tx,
        }
    }

    pub fn snapshot(&self) -> EventSnapshot {
        self.snapshot.clone()
    }

    /// Applies one decoded record, per §4.6's reduction rules. `Unknown`
    /// records are dropped without bumping `version` — they were never part
    /// of the authoritative state.
    pub fn apply(&mut self, record: DecodedRecord) {
        match record {
            DecodedRecord::TimeOfDay(time) => {
                self.snapshot.time_of_day = time;
            }
            DecodedRecord::RaceConfig(config) => {
                self.snapshot.race_config = Some(config);
            }
            DecodedRecord::Schedule(schedule) => {
                self.snapshot.schedule = Some(schedule);
            }
            DecodedRecord::OnCourse(payload) => {
                self.snapshot.on_course = payload.competitors;
            }
            DecodedRecord::Results(results) => {
                if results.is_current {
                    self.snapshot.current_race_id = Some(results.race_id.clone());
                }
                self.snapshot.results = Some(results);
            }
            DecodedRecord::Unknown { element } => {
                warn!(element = %element, "dropping unrecognized top-level record");
                return;
            }
        }

        self.snapshot.version += 1;
        let _ = self.change_tx.send(Arc::new(self.snapshot.clone()));
    }

    /// Applies every record produced from one frame, in order (§5: "within a
    /// single source, records are delivered in arrival order").
    pub fn apply_all(&mut self, records: impl IntoIterator<Item = DecodedRecord>) {
        for record in records {
            self.apply(record);
        }
    }
}
