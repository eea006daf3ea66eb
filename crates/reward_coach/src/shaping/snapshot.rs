//! Worker state facade: fault-tolerant per-field snapshot assembly.

use serde::{Deserialize, Serialize};

use super::types::{Frame, MapId, PartyMemberSummary, Position, StepCount, UNKNOWN_MAP_ID};
use super::worker::{WorkerHandle, WorkerIoError};

// ============================================================================
// Snapshot
// ============================================================================

/// Field names of [`WorkerSnapshot`], used to mark degraded reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotField {
    Position,
    MapId,
    Party,
    BadgeCount,
    MilestoneCount,
    InBattle,
    StationarySteps,
    Dialogue,
    Frame,
}

/// Ephemeral view of one worker, rebuilt on every poll.
///
/// Every field is best-effort: a failed sub-read leaves the safe default in
/// place and records the field in `degraded_fields`, so downstream consumers
/// see the degradation explicitly instead of silently losing signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub step: StepCount,
    pub worker_id: String,
    pub position: Position,
    pub map_id: MapId,
    pub party: Vec<PartyMemberSummary>,
    pub badge_count: u8,
    pub milestone_count: u32,
    pub in_battle: bool,
    pub stationary_steps: u32,
    pub dialogue: String,
    pub frame: Option<Frame>,
    pub degraded_fields: Vec<SnapshotField>,
}

impl WorkerSnapshot {
    pub fn is_degraded(&self, field: SnapshotField) -> bool {
        self.degraded_fields.contains(&field)
    }

    pub fn has_dialogue(&self) -> bool {
        !self.dialogue.trim().is_empty()
    }
}

// ============================================================================
// Facade
// ============================================================================

/// Pure, side-effect-free snapshot assembly over a [`WorkerHandle`].
///
/// Runs on every polling cycle, so it never blocks beyond the per-call
/// transport timeout and never fails as a whole.
#[derive(Debug, Default, Clone, Copy)]
pub struct StateFacade;

impl StateFacade {
    pub fn snapshot(&self, step: StepCount, worker: &dyn WorkerHandle) -> WorkerSnapshot {
        let mut degraded = Vec::new();

        let position = read_or(worker.position(), (0, 0), SnapshotField::Position, &mut degraded);
        let map_id = read_or(
            worker.map_id(),
            UNKNOWN_MAP_ID.to_string(),
            SnapshotField::MapId,
            &mut degraded,
        );
        let party = read_or(worker.party(), Vec::new(), SnapshotField::Party, &mut degraded);
        let badge_count = read_or(worker.badge_count(), 0, SnapshotField::BadgeCount, &mut degraded);
        let milestone_count = read_or(
            worker.milestone_count(),
            0,
            SnapshotField::MilestoneCount,
            &mut degraded,
        );
        let in_battle = read_or(worker.in_battle(), false, SnapshotField::InBattle, &mut degraded);
        let stationary_steps = read_or(
            worker.stationary_steps(),
            0,
            SnapshotField::StationarySteps,
            &mut degraded,
        );
        let dialogue = read_or(
            worker.dialogue_text(),
            String::new(),
            SnapshotField::Dialogue,
            &mut degraded,
        );
        let frame = read_or(worker.frame(), None, SnapshotField::Frame, &mut degraded);

        WorkerSnapshot {
            step,
            worker_id: worker.worker_id().to_string(),
            position,
            map_id,
            party,
            badge_count,
            milestone_count,
            in_battle,
            stationary_steps,
            dialogue,
            frame,
            degraded_fields: degraded,
        }
    }
}

fn read_or<T>(
    result: Result<T, WorkerIoError>,
    default: T,
    field: SnapshotField,
    degraded: &mut Vec<SnapshotField>,
) -> T {
    match result {
        Ok(value) => value,
        Err(_) => {
            degraded.push(field);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaping::worker::InProcessWorker;

    #[test]
    fn healthy_worker_yields_clean_snapshot() {
        let mut worker = InProcessWorker::new("worker-0");
        worker.position = (10, 4);
        worker.map_id = "TOWN".to_string();
        worker.milestone_count = 2;
        worker.dialogue = "Go see the professor!".to_string();

        let snapshot = StateFacade.snapshot(500, &worker);
        assert_eq!(snapshot.worker_id, "worker-0");
        assert_eq!(snapshot.position, (10, 4));
        assert_eq!(snapshot.map_id, "TOWN");
        assert_eq!(snapshot.milestone_count, 2);
        assert!(snapshot.has_dialogue());
        assert!(snapshot.degraded_fields.is_empty());
    }

    #[test]
    fn failing_field_degrades_without_losing_the_rest() {
        // InProcessWorker reports an empty map id as unavailable.
        let mut worker = InProcessWorker::new("worker-0");
        worker.position = (3, 7);
        worker.badge_count = 1;

        let snapshot = StateFacade.snapshot(100, &worker);
        assert_eq!(snapshot.map_id, UNKNOWN_MAP_ID);
        assert!(snapshot.is_degraded(SnapshotField::MapId));
        assert!(!snapshot.is_degraded(SnapshotField::Position));
        assert_eq!(snapshot.position, (3, 7));
        assert_eq!(snapshot.badge_count, 1);
    }

    #[test]
    fn whitespace_dialogue_counts_as_absent() {
        let mut worker = InProcessWorker::new("worker-0");
        worker.map_id = "TOWN".to_string();
        worker.dialogue = "   ".to_string();
        let snapshot = StateFacade.snapshot(0, &worker);
        assert!(!snapshot.has_dialogue());
    }
}
