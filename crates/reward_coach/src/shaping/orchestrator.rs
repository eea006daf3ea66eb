//! Polling orchestrator: cadences, per-worker isolation, log, and metrics.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::config::CoachConfig;
use super::dialogue::{DialogueHistory, RuleBasedClassifier};
use super::directional::DirectionalScorer;
use super::exploration::ExplorationRecord;
use super::extractor::{
    apply_creation_rules, CreationRule, ExtractionContext, ObjectiveCandidate,
    ObjectiveExtractor, RuleBasedExtractor,
};
use super::llm::{GenerateClient, GenerateError, LlmExtractor, OllamaGenerateClient};
use super::objective::{CandidateOutcome, ObjectiveTracker, ObjectiveUpdate};
use super::publisher::{resolve, MultiplierPublisher, SignalSet};
use super::snapshot::StateFacade;
use super::types::{MapId, Position, StepCount, WorkerId, STALE_DIALOGUE_GUARD_STEPS};
use super::worker::WorkerHandle;

const LOG_CAPACITY: usize = 1024;

// ============================================================================
// Structured Log
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapingLogEntry {
    pub step: StepCount,
    pub kind: ShapingLogKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ShapingLogKind {
    ObjectiveSet {
        worker_id: WorkerId,
        name: String,
    },
    ObjectiveReconfirmed {
        worker_id: WorkerId,
        name: String,
        timer_refreshed: bool,
    },
    ObjectiveProtected {
        worker_id: WorkerId,
        kept: String,
        rejected: String,
    },
    NoDialogueSuppressed {
        worker_id: WorkerId,
        rejected: String,
    },
    ObjectiveCompleted {
        worker_id: WorkerId,
        name: String,
    },
    ObjectiveExpired {
        worker_id: WorkerId,
        name: String,
        active_steps: StepCount,
    },
    ObjectiveReplaced {
        worker_id: WorkerId,
        previous: String,
        name: String,
    },
    LocationLearned {
        name: String,
        map_id: MapId,
        position: Position,
    },
    SuccessSiteLearned {
        worker_id: WorkerId,
        map_id: MapId,
        position: Position,
    },
    ExtractorFellBack {
        worker_id: WorkerId,
        message: String,
    },
    WorkerSkipped {
        worker_id: WorkerId,
        stage: String,
        message: String,
    },
    MultiplierPublished {
        worker_id: WorkerId,
        multiplier: f64,
        rationale: String,
    },
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControllerMetrics {
    pub objective_cycles: u64,
    pub proximity_cycles: u64,
    pub extractions: u64,
    pub extractor_fallbacks: u64,
    pub objectives_set: u64,
    pub objectives_completed: u64,
    pub objectives_expired: u64,
    pub objectives_replaced: u64,
    pub locations_learned: u64,
    pub novel_views: u64,
    pub degraded_snapshots: u64,
    pub publish_failures: u64,
    pub workers_skipped: u64,
}

// ============================================================================
// Controller
// ============================================================================

/// Single-threaded reward-shaping controller over all workers.
///
/// Two cadences drive the pipeline: a fast positional-proximity check and a
/// slower dialogue/objective extraction pass. One worker's failure never
/// aborts a cycle for the others; the failing worker keeps its previous
/// multiplier and the incident lands in the structured log.
pub struct RewardController<C: GenerateClient = OllamaGenerateClient> {
    facade: StateFacade,
    classifier: RuleBasedClassifier,
    rule_extractor: RuleBasedExtractor,
    llm_extractor: Option<LlmExtractor<C>>,

    exploration: BTreeMap<WorkerId, ExplorationRecord>,
    dialogue: BTreeMap<WorkerId, DialogueHistory>,
    tracker: ObjectiveTracker,
    directional: DirectionalScorer,
    publisher: MultiplierPublisher,

    /// Milestone count observed at each worker's last objective cycle.
    milestone_baselines: BTreeMap<WorkerId, u32>,
    episode_started_at: BTreeMap<WorkerId, StepCount>,

    objective_interval: StepCount,
    proximity_interval: StepCount,
    last_objective_check: StepCount,
    last_proximity_check: StepCount,

    log: VecDeque<ShapingLogEntry>,
    metrics: ControllerMetrics,
}

impl RewardController<OllamaGenerateClient> {
    /// Rule-based extraction only; no generation service involved.
    pub fn rule_based(config: &CoachConfig) -> Self {
        Self::build(config, None)
    }

    /// Model-backed extraction against the configured HTTP service, with
    /// rule-based extraction as the per-cycle fallback.
    pub fn from_config(config: &CoachConfig) -> Result<Self, GenerateError> {
        let llm = match &config.llm {
            Some(llm_config) => Some(LlmExtractor::from_config(llm_config)?),
            None => None,
        };
        Ok(Self::build(config, llm))
    }
}

impl<C: GenerateClient> RewardController<C> {
    /// Inject a custom generation client (tests, alternative transports).
    pub fn with_client(config: &CoachConfig, client: C) -> Self {
        let llm = config
            .llm
            .as_ref()
            .map(|llm_config| LlmExtractor::new(llm_config, client));
        Self::build(config, llm)
    }

    fn build(config: &CoachConfig, llm_extractor: Option<LlmExtractor<C>>) -> Self {
        Self {
            facade: StateFacade,
            classifier: RuleBasedClassifier,
            rule_extractor: RuleBasedExtractor,
            llm_extractor,
            exploration: BTreeMap::new(),
            dialogue: BTreeMap::new(),
            tracker: ObjectiveTracker::with_ttl(
                config.milestones.clone(),
                config.objective_ttl_steps,
            ),
            directional: DirectionalScorer::new(),
            publisher: MultiplierPublisher::new(),
            milestone_baselines: BTreeMap::new(),
            episode_started_at: BTreeMap::new(),
            objective_interval: config.objective_check_interval.max(1),
            proximity_interval: config.proximity_check_interval.max(1),
            last_objective_check: 0,
            last_proximity_check: 0,
            log: VecDeque::new(),
            metrics: ControllerMetrics::default(),
        }
    }

    /// Drive both cadences at the given simulation step.
    pub fn on_step(&mut self, step: StepCount, workers: &mut [&mut dyn WorkerHandle]) {
        if step.saturating_sub(self.last_proximity_check) >= self.proximity_interval {
            self.last_proximity_check = step;
            self.proximity_cycle(step, workers);
        }
        if step.saturating_sub(self.last_objective_check) >= self.objective_interval {
            self.last_objective_check = step;
            self.objective_cycle(step, workers);
        }
    }

    /// Episode reset for one worker: re-anchor the objective timer and drop
    /// per-episode distance memory. Exploration memory, learned locations,
    /// and directional success sites all survive.
    pub fn begin_episode(&mut self, worker_id: &str, step: StepCount) {
        self.tracker.begin_episode(worker_id, step);
        self.directional.begin_episode(worker_id);
        self.episode_started_at.insert(worker_id.to_string(), step);
    }

    pub fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    pub fn tracker(&self) -> &ObjectiveTracker {
        &self.tracker
    }

    pub fn exploration(&self, worker_id: &str) -> Option<&ExplorationRecord> {
        self.exploration.get(worker_id)
    }

    /// Recorded dialogue lines for a worker, oldest first.
    pub fn dialogue_window(&self, worker_id: &str) -> Vec<String> {
        self.dialogue
            .get(worker_id)
            .map(DialogueHistory::window)
            .unwrap_or_default()
    }

    /// Drain accumulated log entries, oldest first.
    pub fn drain_log(&mut self) -> Vec<ShapingLogEntry> {
        self.log.drain(..).collect()
    }

    fn push_log(&mut self, step: StepCount, kind: ShapingLogKind) {
        if self.log.len() >= LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(ShapingLogEntry { step, kind });
    }

    // ------------------------------------------------------------------
    // Fast cadence
    // ------------------------------------------------------------------

    fn proximity_cycle(&mut self, step: StepCount, workers: &mut [&mut dyn WorkerHandle]) {
        self.metrics.proximity_cycles += 1;

        for worker in workers.iter_mut() {
            let worker_id = worker.worker_id().to_string();

            let (position, map_id) = match (worker.position(), worker.map_id()) {
                (Ok(position), Ok(map_id)) => (position, map_id),
                (Err(err), _) | (_, Err(err)) => {
                    self.metrics.workers_skipped += 1;
                    self.push_log(
                        step,
                        ShapingLogKind::WorkerSkipped {
                            worker_id,
                            stage: "proximity_read".to_string(),
                            message: err.to_string(),
                        },
                    );
                    continue;
                }
            };

            let baseline = self
                .milestone_baselines
                .get(&worker_id)
                .copied()
                .unwrap_or(0);
            let milestone_count = worker.milestone_count().unwrap_or(baseline);

            let result = self
                .directional
                .check(&worker_id, &map_id, position, milestone_count);
            if let Some(learned_at) = result.learned_at {
                self.push_log(
                    step,
                    ShapingLogKind::SuccessSiteLearned {
                        worker_id: worker_id.clone(),
                        map_id: map_id.clone(),
                        position: learned_at,
                    },
                );
            }

            // The directional channel never advances the milestone baseline;
            // that belongs to the objective cycle.
            if let Err(err) = self.publisher.publish_directional(
                &mut **worker,
                step,
                result.multiplier,
                &result.rationale,
                baseline,
            ) {
                self.metrics.publish_failures += 1;
                self.push_log(
                    step,
                    ShapingLogKind::WorkerSkipped {
                        worker_id,
                        stage: "proximity_publish".to_string(),
                        message: err.to_string(),
                    },
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Slow cadence
    // ------------------------------------------------------------------

    fn objective_cycle(&mut self, step: StepCount, workers: &mut [&mut dyn WorkerHandle]) {
        self.metrics.objective_cycles += 1;
        for worker in workers.iter_mut() {
            self.run_objective_pipeline(step, &mut **worker);
        }
    }

    fn run_objective_pipeline(&mut self, step: StepCount, worker: &mut dyn WorkerHandle) {
        let worker_id = worker.worker_id().to_string();

        let mut snapshot = self.facade.snapshot(step, worker);
        if !snapshot.degraded_fields.is_empty() {
            self.metrics.degraded_snapshots += 1;
        }

        // Save-state residue: dialogue observed right after a reset belongs
        // to the previous episode and must not mint objectives.
        let episode_start = self
            .episode_started_at
            .get(&worker_id)
            .copied()
            .unwrap_or(0);
        if step.saturating_sub(episode_start) < STALE_DIALOGUE_GUARD_STEPS {
            snapshot.dialogue.clear();
        }

        let novelty = self
            .exploration
            .entry(worker_id.clone())
            .or_default()
            .observe(&snapshot);
        if novelty.novel_view {
            self.metrics.novel_views += 1;
        }

        self.dialogue
            .entry(worker_id.clone())
            .or_default()
            .record(&snapshot.dialogue, &self.classifier);

        let baseline = self
            .milestone_baselines
            .get(&worker_id)
            .copied()
            .unwrap_or(0);

        for name in self.tracker.learn_completion_sites(&snapshot, baseline) {
            self.metrics.locations_learned += 1;
            self.push_log(
                step,
                ShapingLogKind::LocationLearned {
                    name,
                    map_id: snapshot.map_id.clone(),
                    position: snapshot.position,
                },
            );
        }

        // Clone the context pieces out of self so extraction (which needs
        // &mut for the model client) and the later tracker mutations do not
        // fight over borrows.
        let window = self
            .dialogue
            .get(&worker_id)
            .map(DialogueHistory::window)
            .unwrap_or_default();
        let active = self.tracker.active(&worker_id).cloned();
        let known_goal = active
            .as_ref()
            .and_then(|objective| self.tracker.resolve_goal(objective))
            .cloned();
        let exploration_summary = self
            .exploration
            .get(&worker_id)
            .map(ExplorationRecord::summarize)
            .unwrap_or_default();
        let milestones = self.tracker.milestones().clone();

        let ctx = ExtractionContext {
            snapshot: &snapshot,
            dialogue_window: &window,
            active_objective: active.as_ref(),
            known_goal: known_goal.as_ref(),
            milestone_baseline: baseline,
            milestones: &milestones,
            exploration_summary: &exploration_summary,
        };

        self.metrics.extractions += 1;
        let candidate = match &mut self.llm_extractor {
            Some(extractor) => match extractor.propose(&ctx) {
                Ok(candidate) => candidate,
                Err(failure) => {
                    self.metrics.extractor_fallbacks += 1;
                    self.push_log(
                        step,
                        ShapingLogKind::ExtractorFellBack {
                            worker_id: worker_id.clone(),
                            message: failure.message,
                        },
                    );
                    self.rule_extractor
                        .propose(&ctx)
                        .unwrap_or_else(|_| ObjectiveCandidate::none("rule fallback"))
                }
            },
            None => self
                .rule_extractor
                .propose(&ctx)
                .unwrap_or_else(|_| ObjectiveCandidate::none("rule fallback")),
        };

        let (candidate, rule) = apply_creation_rules(&ctx, candidate);
        match rule {
            Some(CreationRule::NoDialogue { rejected }) => {
                self.push_log(
                    step,
                    ShapingLogKind::NoDialogueSuppressed {
                        worker_id: worker_id.clone(),
                        rejected,
                    },
                );
            }
            Some(CreationRule::GenericProtected { kept, rejected }) => {
                self.push_log(
                    step,
                    ShapingLogKind::ObjectiveProtected {
                        worker_id: worker_id.clone(),
                        kept,
                        rejected,
                    },
                );
            }
            None => {}
        }

        let was_active = active.is_some();
        let stall = candidate.stall;

        let mut objective_created = false;
        if let Some(name) = candidate.name.as_deref() {
            match self.tracker.apply_candidate(&snapshot, name) {
                CandidateOutcome::Created { name } => {
                    self.metrics.objectives_set += 1;
                    objective_created = !was_active;
                    self.push_log(
                        step,
                        ShapingLogKind::ObjectiveSet {
                            worker_id: worker_id.clone(),
                            name,
                        },
                    );
                }
                CandidateOutcome::Replaced { previous, name } => {
                    self.metrics.objectives_set += 1;
                    self.metrics.objectives_replaced += 1;
                    objective_created = true;
                    self.push_log(
                        step,
                        ShapingLogKind::ObjectiveReplaced {
                            worker_id: worker_id.clone(),
                            previous,
                            name,
                        },
                    );
                }
                CandidateOutcome::Reconfirmed {
                    name,
                    timer_refreshed,
                    location_learned,
                } => {
                    if location_learned {
                        self.metrics.locations_learned += 1;
                        self.push_log(
                            step,
                            ShapingLogKind::LocationLearned {
                                name: name.clone(),
                                map_id: snapshot.map_id.clone(),
                                position: snapshot.position,
                            },
                        );
                    }
                    self.push_log(
                        step,
                        ShapingLogKind::ObjectiveReconfirmed {
                            worker_id: worker_id.clone(),
                            name,
                            timer_refreshed,
                        },
                    );
                }
            }
        }

        let update = self.tracker.score(&snapshot);
        match &update {
            Some(ObjectiveUpdate::Completed { name }) => {
                self.metrics.objectives_completed += 1;
                self.push_log(
                    step,
                    ShapingLogKind::ObjectiveCompleted {
                        worker_id: worker_id.clone(),
                        name: name.clone(),
                    },
                );
            }
            Some(ObjectiveUpdate::Expired { name, active_steps }) => {
                self.metrics.objectives_expired += 1;
                self.push_log(
                    step,
                    ShapingLogKind::ObjectiveExpired {
                        worker_id: worker_id.clone(),
                        name: name.clone(),
                        active_steps: *active_steps,
                    },
                );
            }
            _ => {}
        }

        let resolution = resolve(&SignalSet {
            update,
            objective_created,
            novel_view: novelty.novel_view,
            stall,
        });

        match self
            .publisher
            .publish_objective(worker, step, &resolution, snapshot.milestone_count)
        {
            Ok(published) => {
                self.push_log(
                    step,
                    ShapingLogKind::MultiplierPublished {
                        worker_id: worker_id.clone(),
                        multiplier: published.multiplier,
                        rationale: published.rationale,
                    },
                );
            }
            Err(err) => {
                self.metrics.publish_failures += 1;
                self.push_log(
                    step,
                    ShapingLogKind::WorkerSkipped {
                        worker_id: worker_id.clone(),
                        stage: "objective_publish".to_string(),
                        message: err.to_string(),
                    },
                );
            }
        }

        self.milestone_baselines
            .insert(worker_id, snapshot.milestone_count);
    }
}
