//! Objective state machine, learned-location memory, and progress scoring.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::snapshot::WorkerSnapshot;
use super::types::{
    MapId, MilestoneSchedule, Position, StepCount, WorkerId, DEFAULT_OBJECTIVE_TTL_STEPS,
    REFRESH_MIN_ACTIVE_STEPS, REFRESH_REWIND_STEPS,
};

pub fn manhattan_distance(a: Position, b: Position) -> u32 {
    a.0.abs_diff(b.0) + a.1.abs_diff(b.1)
}

// ============================================================================
// Learned Locations
// ============================================================================

/// A (map, position) pair discovered through play, never configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedLocation {
    pub map_id: MapId,
    pub position: Position,
}

/// Process-scoped spatial memory shared by all workers and all episodes.
///
/// Lifecycle: created at process start, mutated only by the scorer, never
/// cleared by an episode reset, discarded at process exit. Write-once per
/// name - the first observed binding wins even if later evidence differs,
/// so a noisy co-occurrence cannot relocate a goal mid-training.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LearnedLocationTable {
    entries: BTreeMap<String, LearnedLocation>,
}

impl LearnedLocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to a location. Returns false when the name was already
    /// bound; the existing binding is kept.
    pub fn learn(&mut self, name: &str, map_id: &str, position: Position) -> bool {
        if name.trim().is_empty() || self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(
            name.to_string(),
            LearnedLocation {
                map_id: map_id.to_string(),
                position,
            },
        );
        true
    }

    /// Exact lookup first, then case-insensitive substring match in either
    /// direction so an objective like "visit_PROF_BIRCH_house" resolves a
    /// location learned under "PROF_BIRCH".
    pub fn resolve(&self, name: &str) -> Option<&LearnedLocation> {
        if name.trim().is_empty() {
            return None;
        }
        if let Some(location) = self.entries.get(name) {
            return Some(location);
        }
        let needle = name.to_lowercase();
        self.entries.iter().find_map(|(learned_name, location)| {
            let learned = learned_name.to_lowercase();
            if learned.contains(&needle) || needle.contains(&learned) {
                Some(location)
            } else {
                None
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

// ============================================================================
// Active Objective
// ============================================================================

/// The single short-term goal a worker is currently pursuing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveObjective {
    pub name: String,
    /// Set when the name matches a scheduled milestone; completion is then
    /// checked against the milestone count.
    pub milestone: Option<String>,
    pub created_at_step: StepCount,
    pub initial_position: Position,
    pub initial_map: MapId,
    pub last_position: Position,
    pub last_map: MapId,
    pub last_distance_to_goal: Option<u32>,
}

impl ActiveObjective {
    fn new(name: &str, milestone: Option<String>, snapshot: &WorkerSnapshot) -> Self {
        Self {
            name: name.to_string(),
            milestone,
            created_at_step: snapshot.step,
            initial_position: snapshot.position,
            initial_map: snapshot.map_id.clone(),
            last_position: snapshot.position,
            last_map: snapshot.map_id.clone(),
            last_distance_to_goal: None,
        }
    }

    pub fn age(&self, now: StepCount) -> StepCount {
        now.saturating_sub(self.created_at_step)
    }
}

// ============================================================================
// Scorer Output
// ============================================================================

/// Directional signal for an objective that stays active this poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    MovingToward { distance: u32 },
    MovingAway { distance: u32 },
    /// The worker just crossed onto the goal's map.
    ReachedGoalMap,
    /// Goal location known, no directional change measured.
    Neutral,
    /// Goal location not yet learned; the worker must explore to find it.
    Exploring,
}

/// Outcome of one scoring pass over a worker's active objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ObjectiveUpdate {
    Completed { name: String },
    Expired { name: String, active_steps: StepCount },
    Progress { name: String, kind: ProgressKind },
}

/// What applying an extractor candidate did to the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CandidateOutcome {
    Created { name: String },
    Reconfirmed {
        name: String,
        timer_refreshed: bool,
        location_learned: bool,
    },
    Replaced { previous: String, name: String },
}

// ============================================================================
// Objective Tracker
// ============================================================================

/// Per-worker objective state machines plus the global learned-location
/// table. All mutation happens from the orchestrator's single polling loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveTracker {
    objectives: BTreeMap<WorkerId, ActiveObjective>,
    learned: LearnedLocationTable,
    milestones: MilestoneSchedule,
    ttl_steps: StepCount,
}

impl ObjectiveTracker {
    pub fn new(milestones: MilestoneSchedule) -> Self {
        Self::with_ttl(milestones, DEFAULT_OBJECTIVE_TTL_STEPS)
    }

    pub fn with_ttl(milestones: MilestoneSchedule, ttl_steps: StepCount) -> Self {
        Self {
            objectives: BTreeMap::new(),
            learned: LearnedLocationTable::new(),
            milestones,
            ttl_steps,
        }
    }

    pub fn active(&self, worker_id: &str) -> Option<&ActiveObjective> {
        self.objectives.get(worker_id)
    }

    pub fn learned(&self) -> &LearnedLocationTable {
        &self.learned
    }

    pub fn milestones(&self) -> &MilestoneSchedule {
        &self.milestones
    }

    /// Goal location for an objective, via its milestone key or its own name.
    pub fn resolve_goal(&self, objective: &ActiveObjective) -> Option<&LearnedLocation> {
        let key = objective.milestone.as_deref().unwrap_or(&objective.name);
        self.learned
            .resolve(key)
            .or_else(|| self.learned.resolve(&objective.name))
    }

    /// Learn locations revealed by this snapshot without any extractor input:
    /// the site where a milestone was just completed, and the current map
    /// when its id contains a scheduled milestone name.
    ///
    /// Returns the names newly bound, for the structured log.
    pub fn learn_completion_sites(
        &mut self,
        snapshot: &WorkerSnapshot,
        milestone_baseline: u32,
    ) -> Vec<String> {
        let mut learned = Vec::new();

        if let Some(name) = self
            .milestones
            .newly_completed(milestone_baseline, snapshot.milestone_count)
        {
            let name = name.to_string();
            if self
                .learned
                .learn(&name, &snapshot.map_id, snapshot.position)
            {
                learned.push(name);
            }
        }

        let map_lower = snapshot.map_id.to_lowercase();
        for name in self.milestones.names() {
            if map_lower.contains(&name.to_lowercase())
                && self
                    .learned
                    .learn(name, &snapshot.map_id, snapshot.position)
            {
                learned.push(name.clone());
            }
        }

        learned
    }

    /// Apply a non-null extractor candidate. The no-dialogue and generic
    /// protection rules are enforced upstream; by the time a name reaches
    /// this method it is allowed to create or replace.
    pub fn apply_candidate(
        &mut self,
        snapshot: &WorkerSnapshot,
        candidate_name: &str,
    ) -> CandidateOutcome {
        let worker_id = snapshot.worker_id.clone();

        if let Some(existing) = self.objectives.get_mut(&worker_id) {
            if existing.name.eq_ignore_ascii_case(candidate_name) {
                existing.last_position = snapshot.position;
                existing.last_map = snapshot.map_id.clone();

                // A re-confirmed objective is still live: rewind its timer so
                // it does not expire while the worker is actively pursuing it.
                let mut timer_refreshed = false;
                if existing.age(snapshot.step) > REFRESH_MIN_ACTIVE_STEPS {
                    existing.created_at_step =
                        snapshot.step.saturating_sub(REFRESH_REWIND_STEPS);
                    timer_refreshed = true;
                }

                let name = existing.name.clone();
                let location_learned = snapshot.has_dialogue()
                    && self
                        .learned
                        .learn(&name, &snapshot.map_id, snapshot.position);
                return CandidateOutcome::Reconfirmed {
                    name,
                    timer_refreshed,
                    location_learned,
                };
            }

            let previous = existing.name.clone();
            let replacement = self.make_objective(candidate_name, snapshot);
            self.objectives.insert(worker_id, replacement);
            if snapshot.has_dialogue() {
                self.learned
                    .learn(candidate_name, &snapshot.map_id, snapshot.position);
            }
            return CandidateOutcome::Replaced {
                previous,
                name: candidate_name.to_string(),
            };
        }

        let objective = self.make_objective(candidate_name, snapshot);
        self.objectives.insert(worker_id, objective);
        if snapshot.has_dialogue() {
            self.learned
                .learn(candidate_name, &snapshot.map_id, snapshot.position);
        }
        CandidateOutcome::Created {
            name: candidate_name.to_string(),
        }
    }

    fn make_objective(&self, name: &str, snapshot: &WorkerSnapshot) -> ActiveObjective {
        let milestone = self
            .milestones
            .contains(name)
            .then(|| name.to_string());
        ActiveObjective::new(name, milestone, snapshot)
    }

    /// Advance the state machine one poll: completion, expiry, proximity.
    ///
    /// Runs on every objective cycle whether or not the extractor proposed
    /// anything, so distances stay fresh. Returns `None` when the worker has
    /// no active objective.
    pub fn score(&mut self, snapshot: &WorkerSnapshot) -> Option<ObjectiveUpdate> {
        let worker_id = snapshot.worker_id.as_str();
        let (name, milestone, map_changed, active_steps) = {
            let objective = self.objectives.get(worker_id)?;
            (
                objective.name.clone(),
                objective.milestone.clone(),
                objective.last_map != snapshot.map_id,
                objective.age(snapshot.step),
            )
        };

        // Terminal transitions first.
        if let Some(milestone) = &milestone {
            if self
                .milestones
                .is_complete(milestone, snapshot.milestone_count)
            {
                self.learned
                    .learn(&name, &snapshot.map_id, snapshot.position);
                self.objectives.remove(worker_id);
                return Some(ObjectiveUpdate::Completed { name });
            }
        }

        if active_steps > self.ttl_steps {
            self.objectives.remove(worker_id);
            return Some(ObjectiveUpdate::Expired { name, active_steps });
        }

        let goal = {
            let objective = self.objectives.get(worker_id)?;
            self.resolve_goal(objective).cloned()
        };
        let objective = self.objectives.get_mut(worker_id)?;
        objective.last_position = snapshot.position;
        objective.last_map = snapshot.map_id.clone();

        // An objective created this very poll has no movement to measure;
        // distance tracking starts on the next cycle.
        if objective.created_at_step == snapshot.step {
            let kind = if goal.is_some() {
                ProgressKind::Neutral
            } else {
                ProgressKind::Exploring
            };
            return Some(ObjectiveUpdate::Progress { name, kind });
        }

        let kind = match goal {
            Some(goal) if goal.map_id == snapshot.map_id => {
                if map_changed {
                    objective.last_distance_to_goal = None;
                    ProgressKind::ReachedGoalMap
                } else {
                    let distance = manhattan_distance(snapshot.position, goal.position);
                    let kind = match objective.last_distance_to_goal {
                        Some(previous) if distance < previous => {
                            ProgressKind::MovingToward { distance }
                        }
                        Some(previous) if distance > previous => {
                            ProgressKind::MovingAway { distance }
                        }
                        _ => ProgressKind::Neutral,
                    };
                    objective.last_distance_to_goal = Some(distance);
                    kind
                }
            }
            Some(_) => {
                // Goal known but on another map; nothing directional yet.
                objective.last_distance_to_goal = None;
                ProgressKind::Neutral
            }
            None => ProgressKind::Exploring,
        };

        Some(ObjectiveUpdate::Progress { name, kind })
    }

    /// Episode reset: re-anchor the active objective's timer and drop
    /// distance memory. Exploration memory and the learned-location table
    /// are deliberately untouched.
    pub fn begin_episode(&mut self, worker_id: &str, now: StepCount) {
        if let Some(objective) = self.objectives.get_mut(worker_id) {
            objective.created_at_step = now;
            objective.last_distance_to_goal = None;
        }
    }

    /// Drop a worker's active objective outright (testing / teardown).
    pub fn clear(&mut self, worker_id: &str) -> Option<ActiveObjective> {
        self.objectives.remove(worker_id)
    }
}
