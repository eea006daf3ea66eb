//! Adaptive reward shaping for sparse-reward game training loops.
//!
//! The controller polls parallel training workers for low-level game
//! telemetry, infers short-term objectives from in-game dialogue and
//! milestone progress, remembers where objectives were satisfied across
//! episode resets, and publishes a bounded multiplicative adjustment to
//! each worker's reward signal - without ever injecting privileged
//! ground-truth coordinates.

pub mod shaping;

pub use shaping::{
    CoachConfig, ControllerMetrics, DialogueHistory, DirectionalScorer, ExplorationRecord,
    Frame, GenerateClient, GenerateError, InProcessWorker, LearnedLocationTable, LlmConfig,
    LlmExtractor, MilestoneSchedule, MultiplierPublisher, ObjectiveCandidate,
    ObjectiveExtractor, ObjectiveTracker, OllamaGenerateClient, RewardController,
    RuleBasedExtractor, ShapingLogEntry, ShapingLogKind, StateFacade, WorkerHandle,
    WorkerIoError, WorkerSnapshot,
};
