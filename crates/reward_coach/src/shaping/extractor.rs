//! Objective extraction: the trait, the deterministic rule-based variant,
//! and the creation rules enforced above every variant.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::objective::{ActiveObjective, LearnedLocation};
use super::snapshot::WorkerSnapshot;
use super::types::{
    is_generic_objective, MilestoneSchedule, STALL_MILD_THRESHOLD, STALL_SEVERE_THRESHOLD,
};

// ============================================================================
// Candidate
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallSeverity {
    Mild,
    Severe,
}

/// One extraction result: a proposed objective name (or nothing) plus a
/// short rationale. `stall` flags a stationary worker for the publisher;
/// the extractor itself never applies penalties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveCandidate {
    pub name: Option<String>,
    pub rationale: String,
    pub stall: Option<StallSeverity>,
}

impl ObjectiveCandidate {
    pub fn none(rationale: impl Into<String>) -> Self {
        Self {
            name: None,
            rationale: rationale.into(),
            stall: None,
        }
    }

    pub fn named(name: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            rationale: rationale.into(),
            stall: None,
        }
    }
}

/// Everything an extractor may look at for one worker and cycle.
#[derive(Debug, Clone)]
pub struct ExtractionContext<'a> {
    pub snapshot: &'a WorkerSnapshot,
    /// Recent dialogue lines, oldest first. Empty means no text observed.
    pub dialogue_window: &'a [String],
    pub active_objective: Option<&'a ActiveObjective>,
    /// Goal location for the active objective, when one is already learned.
    pub known_goal: Option<&'a LearnedLocation>,
    /// Milestone count at the previous objective cycle.
    pub milestone_baseline: u32,
    pub milestones: &'a MilestoneSchedule,
    pub exploration_summary: &'a str,
}

// ============================================================================
// Extractor Trait
// ============================================================================

/// Total failure of an extractor variant for one cycle. The orchestrator
/// answers this by re-running the rule-based variant; it never aborts a
/// worker's cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorFailure {
    pub message: String,
}

impl fmt::Display for ExtractorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "objective extraction failed: {}", self.message)
    }
}

impl Error for ExtractorFailure {}

/// Polymorphic objective extraction: rule-based or model-backed.
pub trait ObjectiveExtractor {
    fn propose(&mut self, ctx: &ExtractionContext<'_>)
        -> Result<ObjectiveCandidate, ExtractorFailure>;
}

// ============================================================================
// Rule-Based Variant
// ============================================================================

/// Deterministic thresholds, no external calls: flag stalls, name freshly
/// completed milestones, otherwise propose nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedExtractor;

impl ObjectiveExtractor for RuleBasedExtractor {
    fn propose(
        &mut self,
        ctx: &ExtractionContext<'_>,
    ) -> Result<ObjectiveCandidate, ExtractorFailure> {
        let snapshot = ctx.snapshot;

        if snapshot.stationary_steps > STALL_SEVERE_THRESHOLD {
            return Ok(ObjectiveCandidate {
                name: None,
                rationale: "agent is stuck, penalizing to force exploration".to_string(),
                stall: Some(StallSeverity::Severe),
            });
        }
        if snapshot.stationary_steps > STALL_MILD_THRESHOLD {
            return Ok(ObjectiveCandidate {
                name: None,
                rationale: "agent showing low movement".to_string(),
                stall: Some(StallSeverity::Mild),
            });
        }

        if let Some(name) = ctx
            .milestones
            .newly_completed(ctx.milestone_baseline, snapshot.milestone_count)
        {
            return Ok(ObjectiveCandidate::named(
                name,
                format!(
                    "new milestone, total {} completed",
                    snapshot.milestone_count
                ),
            ));
        }

        Ok(ObjectiveCandidate::none("normal operation"))
    }
}

// ============================================================================
// Creation Rules
// ============================================================================

/// Why a candidate name was discarded or rewritten before reaching the
/// state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CreationRule {
    /// No dialogue observed: an objective can only be created in reaction
    /// to text, never from game state alone.
    NoDialogue { rejected: String },
    /// A generic catch-all may not replace a specific active objective;
    /// the existing name is kept (and counts as a re-confirmation).
    GenericProtected { kept: String, rejected: String },
}

/// Enforce the absolute no-dialogue rule and the generic-protection rule
/// above both extractor variants.
pub fn apply_creation_rules(
    ctx: &ExtractionContext<'_>,
    mut candidate: ObjectiveCandidate,
) -> (ObjectiveCandidate, Option<CreationRule>) {
    let Some(name) = candidate.name.clone() else {
        return (candidate, None);
    };

    let maintains_active = ctx
        .active_objective
        .is_some_and(|active| active.name.eq_ignore_ascii_case(&name));

    // Creating (or replacing with) a new name requires observed text; a
    // re-proposal of the active name merely maintains it.
    if ctx.dialogue_window.is_empty() && !maintains_active {
        candidate.name = None;
        return (candidate, Some(CreationRule::NoDialogue { rejected: name }));
    }

    if let Some(active) = ctx.active_objective {
        if is_generic_objective(&name)
            && !is_generic_objective(&active.name)
            && !maintains_active
        {
            let kept = active.name.clone();
            candidate.name = Some(kept.clone());
            return (
                candidate,
                Some(CreationRule::GenericProtected {
                    kept,
                    rejected: name,
                }),
            );
        }
    }

    (candidate, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaping::snapshot::StateFacade;
    use crate::shaping::worker::InProcessWorker;

    fn schedule() -> MilestoneSchedule {
        MilestoneSchedule::new(vec![
            "LITTLEROOT_TOWN".to_string(),
            "ROUTE_101".to_string(),
        ])
    }

    fn snapshot(stationary: u32, milestone_count: u32, dialogue: &str) -> WorkerSnapshot {
        let mut worker = InProcessWorker::new("worker-0");
        worker.map_id = "TOWN".to_string();
        worker.stationary_steps = stationary;
        worker.milestone_count = milestone_count;
        worker.dialogue = dialogue.to_string();
        StateFacade.snapshot(1000, &worker)
    }

    fn ctx<'a>(
        snapshot: &'a WorkerSnapshot,
        window: &'a [String],
        active: Option<&'a ActiveObjective>,
        baseline: u32,
        milestones: &'a MilestoneSchedule,
    ) -> ExtractionContext<'a> {
        ExtractionContext {
            snapshot,
            dialogue_window: window,
            active_objective: active,
            known_goal: None,
            milestone_baseline: baseline,
            milestones,
            exploration_summary: "",
        }
    }

    fn active(name: &str) -> ActiveObjective {
        let snap = snapshot(0, 0, "hello");
        // Build through the public surface: a one-off tracker.
        let mut tracker = crate::shaping::objective::ObjectiveTracker::new(schedule());
        tracker.apply_candidate(&snap, name);
        tracker.active("worker-0").unwrap().clone()
    }

    #[test]
    fn severe_stall_beats_milestone_proposal() {
        let schedule = schedule();
        let snap = snapshot(150, 2, "");
        let window = Vec::new();
        let candidate = RuleBasedExtractor
            .propose(&ctx(&snap, &window, None, 1, &schedule))
            .unwrap();
        assert_eq!(candidate.name, None);
        assert_eq!(candidate.stall, Some(StallSeverity::Severe));
    }

    #[test]
    fn mild_stall_between_thresholds() {
        let schedule = schedule();
        let snap = snapshot(60, 0, "");
        let window = Vec::new();
        let candidate = RuleBasedExtractor
            .propose(&ctx(&snap, &window, None, 0, &schedule))
            .unwrap();
        assert_eq!(candidate.stall, Some(StallSeverity::Mild));
    }

    #[test]
    fn milestone_rise_names_the_milestone() {
        let schedule = schedule();
        let snap = snapshot(0, 2, "");
        let window = Vec::new();
        let candidate = RuleBasedExtractor
            .propose(&ctx(&snap, &window, None, 1, &schedule))
            .unwrap();
        assert_eq!(candidate.name.as_deref(), Some("ROUTE_101"));
    }

    #[test]
    fn steady_state_proposes_nothing() {
        let schedule = schedule();
        let snap = snapshot(10, 1, "");
        let window = Vec::new();
        let candidate = RuleBasedExtractor
            .propose(&ctx(&snap, &window, None, 1, &schedule))
            .unwrap();
        assert_eq!(candidate.name, None);
        assert_eq!(candidate.stall, None);
    }

    #[test]
    fn no_dialogue_suppresses_new_names() {
        let schedule = schedule();
        let snap = snapshot(0, 2, "");
        let window: Vec<String> = Vec::new();
        let candidate = ObjectiveCandidate::named("ROUTE_101", "milestone rise");
        let (result, rule) = apply_creation_rules(&ctx(&snap, &window, None, 1, &schedule), candidate);
        assert_eq!(result.name, None);
        assert_eq!(
            rule,
            Some(CreationRule::NoDialogue {
                rejected: "ROUTE_101".to_string()
            })
        );
    }

    #[test]
    fn no_dialogue_still_maintains_active_objective() {
        let schedule = schedule();
        let snap = snapshot(0, 0, "");
        let window: Vec<String> = Vec::new();
        let current = active("find_prof");
        let candidate = ObjectiveCandidate::named("find_prof", "still pursuing");
        let (result, rule) =
            apply_creation_rules(&ctx(&snap, &window, Some(&current), 0, &schedule), candidate);
        assert_eq!(result.name.as_deref(), Some("find_prof"));
        assert_eq!(rule, None);
    }

    #[test]
    fn generic_name_cannot_replace_specific_objective() {
        let schedule = schedule();
        let snap = snapshot(0, 0, "Um, hi! Scary POKeMON out there!");
        let window = vec!["Um, hi! Scary POKeMON out there!".to_string()];
        let current = active("visit_professor");
        let candidate = ObjectiveCandidate::named("explore_and_talk_to_npcs", "generic chat");
        let (result, rule) =
            apply_creation_rules(&ctx(&snap, &window, Some(&current), 0, &schedule), candidate);
        assert_eq!(result.name.as_deref(), Some("visit_professor"));
        assert_eq!(
            rule,
            Some(CreationRule::GenericProtected {
                kept: "visit_professor".to_string(),
                rejected: "explore_and_talk_to_npcs".to_string(),
            })
        );
    }

    #[test]
    fn generic_may_replace_generic() {
        let schedule = schedule();
        let snap = snapshot(0, 0, "Hi!");
        let window = vec!["Hi!".to_string()];
        let current = active("talk_to_npcs");
        let candidate = ObjectiveCandidate::named("explore_and_talk_to_npcs", "generic");
        let (result, rule) =
            apply_creation_rules(&ctx(&snap, &window, Some(&current), 0, &schedule), candidate);
        assert_eq!(result.name.as_deref(), Some("explore_and_talk_to_npcs"));
        assert_eq!(rule, None);
    }

    #[test]
    fn specific_name_with_dialogue_passes_through() {
        let schedule = schedule();
        let snap = snapshot(0, 0, "Go see PROF. BIRCH!");
        let window = vec!["Go see PROF. BIRCH!".to_string()];
        let current = active("explore_town");
        let candidate = ObjectiveCandidate::named("visit_PROF_BIRCH", "explicit direction");
        let (result, rule) =
            apply_creation_rules(&ctx(&snap, &window, Some(&current), 0, &schedule), candidate);
        assert_eq!(result.name.as_deref(), Some("visit_PROF_BIRCH"));
        assert_eq!(rule, None);
    }
}
