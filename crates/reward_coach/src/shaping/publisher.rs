//! Multiplier resolution and write-back to workers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::extractor::StallSeverity;
use super::objective::{ObjectiveUpdate, ProgressKind};
use super::types::{
    StepCount, WorkerId, MAX_COMBINED_MULTIPLIER, MIN_COMBINED_MULTIPLIER,
    MULT_MILESTONE_COMPLETED, MULT_MOVING_AWAY, MULT_MOVING_TOWARD, MULT_NEUTRAL,
    MULT_NEW_OBJECTIVE, MULT_NOVEL_VIEW_ACTIVE, MULT_NOVEL_VIEW_IDLE, MULT_REACHED_GOAL_MAP,
    MULT_STALL_MILD, MULT_STALL_SEVERE,
};
use super::worker::{WorkerHandle, WorkerIoError};

// ============================================================================
// Signals and Resolution
// ============================================================================

/// Everything the objective cycle produced for one worker, ready to be
/// collapsed into a single multiplier.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignalSet {
    /// Scorer outcome for the (possibly just-created) active objective.
    pub update: Option<ObjectiveUpdate>,
    /// An objective was created this cycle where none was active before.
    pub objective_created: bool,
    /// The current view had never been seen by this worker.
    pub novel_view: bool,
    /// Stationary-step condition flagged by the rule-based extractor.
    pub stall: Option<StallSeverity>,
}

/// One resolved multiplier with its human-readable justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub multiplier: f64,
    pub rationale: String,
}

impl Resolution {
    fn new(multiplier: f64, rationale: impl Into<String>) -> Self {
        Self {
            multiplier,
            rationale: rationale.into(),
        }
    }
}

/// Collapse one cycle's signals into the objective-channel multiplier.
///
/// Priority is fixed and deterministic (highest first): milestone completion,
/// expiry, directional progress, goal-map arrival, novelty, then neutral.
/// The stall penalty only ever replaces an otherwise-neutral outcome - a
/// measurable progress signal always wins over the stall heuristic.
pub fn resolve(signals: &SignalSet) -> Resolution {
    let resolution = match &signals.update {
        Some(ObjectiveUpdate::Completed { name }) => Resolution::new(
            MULT_MILESTONE_COMPLETED,
            format!("milestone completed: {name}"),
        ),
        Some(ObjectiveUpdate::Expired { name, active_steps }) => Resolution::new(
            MULT_NEUTRAL,
            format!("objective '{name}' expired after {active_steps} steps"),
        ),
        Some(ObjectiveUpdate::Progress { name, kind }) => match kind {
            ProgressKind::MovingToward { distance } => Resolution::new(
                MULT_MOVING_TOWARD,
                format!("approaching '{name}', distance {distance}"),
            ),
            ProgressKind::MovingAway { distance } => Resolution::new(
                MULT_MOVING_AWAY,
                format!("moving away from '{name}', distance {distance}"),
            ),
            ProgressKind::ReachedGoalMap => {
                Resolution::new(MULT_REACHED_GOAL_MAP, format!("reached goal map for '{name}'"))
            }
            ProgressKind::Neutral | ProgressKind::Exploring => {
                if signals.objective_created {
                    Resolution::new(MULT_NEW_OBJECTIVE, format!("new objective: '{name}'"))
                } else if signals.novel_view {
                    Resolution::new(
                        MULT_NOVEL_VIEW_ACTIVE,
                        format!("new view discovered while pursuing '{name}'"),
                    )
                } else {
                    Resolution::new(MULT_NEUTRAL, format!("pursuing '{name}', no measurable progress"))
                }
            }
        },
        None => {
            if signals.novel_view {
                Resolution::new(MULT_NOVEL_VIEW_IDLE, "new view discovered (no objective)")
            } else {
                Resolution::new(MULT_NEUTRAL, "no objective, no new signal")
            }
        }
    };

    if resolution.multiplier == MULT_NEUTRAL {
        match signals.stall {
            Some(StallSeverity::Severe) => {
                return Resolution::new(MULT_STALL_SEVERE, "agent is stuck, forcing exploration")
            }
            Some(StallSeverity::Mild) => {
                return Resolution::new(MULT_STALL_MILD, "agent showing low movement")
            }
            None => {}
        }
    }

    resolution
}

pub fn clamp_multiplier(value: f64) -> f64 {
    value.clamp(MIN_COMBINED_MULTIPLIER, MAX_COMBINED_MULTIPLIER)
}

// ============================================================================
// Publisher
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChannelState {
    objective_multiplier: f64,
    objective_rationale: String,
    directional_multiplier: f64,
    directional_rationale: String,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            objective_multiplier: MULT_NEUTRAL,
            objective_rationale: String::new(),
            directional_multiplier: MULT_NEUTRAL,
            directional_rationale: String::new(),
        }
    }
}

/// Record of one successful write-back, for the structured log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedMultiplier {
    pub step: StepCount,
    pub multiplier: f64,
    pub rationale: String,
    pub milestone_baseline: u32,
}

/// Combines the two multiplier channels and writes the product back.
///
/// The objective channel updates on the slow cadence, the directional
/// channel on the fast cadence; each publish recomputes the product of the
/// latest value of both, clamps it, and stores it on the worker together
/// with the rationale and the milestone baseline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiplierPublisher {
    channels: BTreeMap<WorkerId, ChannelState>,
}

impl MultiplierPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_objective(
        &mut self,
        worker: &mut dyn WorkerHandle,
        step: StepCount,
        resolution: &Resolution,
        milestone_baseline: u32,
    ) -> Result<PublishedMultiplier, WorkerIoError> {
        let channel = self
            .channels
            .entry(worker.worker_id().to_string())
            .or_default();
        channel.objective_multiplier = resolution.multiplier;
        channel.objective_rationale = resolution.rationale.clone();
        Self::write(worker, step, channel, milestone_baseline)
    }

    pub fn publish_directional(
        &mut self,
        worker: &mut dyn WorkerHandle,
        step: StepCount,
        multiplier: f64,
        rationale: &str,
        milestone_baseline: u32,
    ) -> Result<PublishedMultiplier, WorkerIoError> {
        let channel = self
            .channels
            .entry(worker.worker_id().to_string())
            .or_default();
        channel.directional_multiplier = multiplier;
        channel.directional_rationale = rationale.to_string();
        Self::write(worker, step, channel, milestone_baseline)
    }

    fn write(
        worker: &mut dyn WorkerHandle,
        step: StepCount,
        channel: &ChannelState,
        milestone_baseline: u32,
    ) -> Result<PublishedMultiplier, WorkerIoError> {
        let combined =
            clamp_multiplier(channel.objective_multiplier * channel.directional_multiplier);

        let rationale = match (
            channel.objective_rationale.is_empty(),
            channel.directional_rationale.is_empty(),
        ) {
            (false, false) => format!(
                "{} | {}",
                channel.objective_rationale, channel.directional_rationale
            ),
            (false, true) => channel.objective_rationale.clone(),
            (true, false) => channel.directional_rationale.clone(),
            (true, true) => "neutral".to_string(),
        };

        worker.set_reward_multiplier(combined, &rationale, milestone_baseline)?;
        Ok(PublishedMultiplier {
            step,
            multiplier: combined,
            rationale,
            milestone_baseline,
        })
    }

    /// Latest objective-channel multiplier for a worker, if any was published.
    pub fn objective_multiplier(&self, worker_id: &str) -> Option<f64> {
        self.channels
            .get(worker_id)
            .map(|channel| channel.objective_multiplier)
    }

    pub fn directional_multiplier(&self, worker_id: &str) -> Option<f64> {
        self.channels
            .get(worker_id)
            .map(|channel| channel.directional_multiplier)
    }
}
