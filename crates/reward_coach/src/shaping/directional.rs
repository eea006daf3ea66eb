//! Fast-cadence proximity scoring against dynamically learned success sites.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::objective::manhattan_distance;
use super::types::{
    MapId, Position, WorkerId, DIRECTIONAL_BOOST, DIRECTIONAL_PENALTY,
    DIRECTIONAL_RETREAT_TOLERANCE, MULT_NEUTRAL,
};

/// One fast-cadence proximity verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionalResult {
    pub multiplier: f64,
    pub rationale: String,
    /// Position learned as a success site this check, if any.
    pub learned_at: Option<Position>,
}

impl DirectionalResult {
    fn neutral(rationale: impl Into<String>) -> Self {
        Self {
            multiplier: MULT_NEUTRAL,
            rationale: rationale.into(),
            learned_at: None,
        }
    }
}

/// Rewards returning toward places where milestones were previously earned.
///
/// Success positions are learned purely from observed milestone completions,
/// never configured - no privileged coordinates enter the reward path. The
/// per-episode distance memory resets with the episode; the learned sites
/// persist for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectionalScorer {
    success_positions: BTreeMap<MapId, Vec<Position>>,
    last_distance: BTreeMap<WorkerId, u32>,
    last_milestone_count: BTreeMap<WorkerId, u32>,
}

impl DirectionalScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one worker's position against the learned sites on its map.
    pub fn check(
        &mut self,
        worker_id: &str,
        map_id: &str,
        position: Position,
        milestone_count: u32,
    ) -> DirectionalResult {
        let mut learned_at = None;

        // A milestone rise marks the current position as a success site.
        let previous_count = self
            .last_milestone_count
            .insert(worker_id.to_string(), milestone_count)
            .unwrap_or(0);
        if milestone_count > previous_count {
            self.success_positions
                .entry(map_id.to_string())
                .or_default()
                .push(position);
            learned_at = Some(position);
        }

        let Some(sites) = self.success_positions.get(map_id) else {
            // No sites learned here yet: pure exploration, neutral.
            self.last_distance.remove(worker_id);
            return DirectionalResult::neutral(format!("exploring {map_id} (no known sites)"));
        };

        let Some(current_distance) = sites
            .iter()
            .map(|site| manhattan_distance(position, *site))
            .min()
        else {
            self.last_distance.remove(worker_id);
            return DirectionalResult::neutral(format!("exploring {map_id} (no known sites)"));
        };

        let previous = self
            .last_distance
            .insert(worker_id.to_string(), current_distance);

        let mut result = match previous {
            Some(previous) if current_distance < previous => DirectionalResult {
                multiplier: DIRECTIONAL_BOOST,
                rationale: "returning toward a previous success site".to_string(),
                learned_at: None,
            },
            Some(previous)
                if current_distance > previous + DIRECTIONAL_RETREAT_TOLERANCE =>
            {
                DirectionalResult {
                    multiplier: DIRECTIONAL_PENALTY,
                    rationale: "moving away from known sites".to_string(),
                    learned_at: None,
                }
            }
            _ => DirectionalResult::neutral(format!("exploring {map_id}")),
        };
        result.learned_at = learned_at;
        result
    }

    /// Episode reset: forget per-episode distances, keep learned sites.
    pub fn begin_episode(&mut self, worker_id: &str) {
        self.last_distance.remove(worker_id);
    }

    pub fn sites_on(&self, map_id: &str) -> usize {
        self.success_positions
            .get(map_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
