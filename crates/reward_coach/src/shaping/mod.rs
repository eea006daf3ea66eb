//! Reward-shaping subsystem - observes worker telemetry, tracks inferred
//! objectives, and publishes bounded reward multipliers.
//!
//! This module is organized into submodules:
//! - `types`: core type definitions (IDs, constants, milestone schedule)
//! - `worker`: the WorkerHandle call boundary and the in-process backend
//! - `snapshot`: WorkerSnapshot and the fault-tolerant state facade
//! - `exploration`: visited-map/position memory and view novelty hashing
//! - `dialogue`: dialogue chain recording and text classification
//! - `extractor`: objective extraction trait, rule-based variant, creation rules
//! - `llm`: generation-service client and the model-backed extractor
//! - `objective`: objective state machine, learned locations, progress scoring
//! - `directional`: fast-cadence proximity scoring against success sites
//! - `publisher`: multiplier resolution, clamping, and worker write-back
//! - `orchestrator`: the polling controller, structured log, and metrics
//! - `config`: TOML + environment configuration

mod config;
mod dialogue;
mod directional;
mod exploration;
mod extractor;
mod llm;
mod objective;
mod orchestrator;
mod publisher;
mod snapshot;
mod types;
mod worker;

#[cfg(test)]
mod tests;

pub use config::{
    CoachConfig, CoachConfigError, LlmConfig, DEFAULT_CONFIG_FILE_NAME, DEFAULT_LLM_BASE_URL,
    DEFAULT_LLM_MODEL, DEFAULT_LLM_TEMPERATURE, DEFAULT_LLM_TIMEOUT_MS, ENV_LLM_BASE_URL,
    ENV_LLM_MODEL, ENV_LLM_TEMPERATURE, ENV_LLM_TIMEOUT_MS, ENV_MILESTONES,
    ENV_OBJECTIVE_INTERVAL, ENV_OBJECTIVE_TTL, ENV_PROXIMITY_INTERVAL,
};
pub use dialogue::{DialogueClass, DialogueClassifier, DialogueHistory, RuleBasedClassifier};
pub use directional::{DirectionalResult, DirectionalScorer};
pub use exploration::{view_hash, ExplorationRecord, NoveltyReport};
pub use extractor::{
    apply_creation_rules, CreationRule, ExtractionContext, ExtractorFailure, ObjectiveCandidate,
    ObjectiveExtractor, RuleBasedExtractor, StallSeverity,
};
pub use llm::{
    parse_shaping_reply, GenerateClient, GenerateError, GenerateRequest, LlmExtractor,
    OllamaGenerateClient, ShapingReply,
};
pub use objective::{
    manhattan_distance, ActiveObjective, CandidateOutcome, LearnedLocation, LearnedLocationTable,
    ObjectiveTracker, ObjectiveUpdate, ProgressKind,
};
pub use orchestrator::{ControllerMetrics, RewardController, ShapingLogEntry, ShapingLogKind};
pub use publisher::{
    clamp_multiplier, resolve, MultiplierPublisher, PublishedMultiplier, Resolution, SignalSet,
};
pub use snapshot::{SnapshotField, StateFacade, WorkerSnapshot};
pub use types::{
    is_generic_objective, Frame, MapId, MilestoneSchedule, PartyMemberSummary, Position,
    StepCount, WorkerId, DEFAULT_OBJECTIVE_CHECK_INTERVAL, DEFAULT_OBJECTIVE_TTL_STEPS,
    DEFAULT_PROXIMITY_CHECK_INTERVAL, DIALOGUE_HISTORY_CAPACITY, GENERIC_OBJECTIVE_NAMES,
    MAX_COMBINED_MULTIPLIER, MIN_COMBINED_MULTIPLIER, MULT_MILESTONE_COMPLETED,
    MULT_MOVING_AWAY, MULT_MOVING_TOWARD, MULT_NEUTRAL, MULT_NEW_OBJECTIVE,
    MULT_NOVEL_VIEW_ACTIVE, MULT_NOVEL_VIEW_IDLE, MULT_REACHED_GOAL_MAP, MULT_STALL_MILD,
    MULT_STALL_SEVERE, STALL_MILD_THRESHOLD, STALL_SEVERE_THRESHOLD,
    STALE_DIALOGUE_GUARD_STEPS, UNKNOWN_MAP_ID,
};
pub use worker::{InProcessWorker, WorkerHandle, WorkerIoError};
