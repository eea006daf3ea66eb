//! Worker call boundary: the WorkerHandle trait and the in-process backend.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{Frame, MapId, PartyMemberSummary, Position};

// ============================================================================
// Worker Interface
// ============================================================================

/// Explicit request/response boundary to one training worker.
///
/// Workers run as separate processes in multi-worker training; nothing is
/// shared with the controller except these per-operation calls. The same
/// trait is backed by direct field access in single-process mode
/// ([`InProcessWorker`]), so the controller never cares which side of a
/// process boundary it is talking to.
///
/// Every read is independently fallible: a remote transport error or an
/// uninitialized buffer on the worker side fails only that one operation.
pub trait WorkerHandle {
    fn worker_id(&self) -> &str;

    fn position(&self) -> Result<Position, WorkerIoError>;
    fn map_id(&self) -> Result<MapId, WorkerIoError>;
    fn party(&self) -> Result<Vec<PartyMemberSummary>, WorkerIoError>;
    fn badge_count(&self) -> Result<u8, WorkerIoError>;
    fn milestone_count(&self) -> Result<u32, WorkerIoError>;
    fn in_battle(&self) -> Result<bool, WorkerIoError>;
    /// Consecutive steps without positional change, maintained worker-side.
    fn stationary_steps(&self) -> Result<u32, WorkerIoError>;
    /// Current dialogue text from the worker's cache; empty when none.
    fn dialogue_text(&self) -> Result<String, WorkerIoError>;
    /// Current screen capture for novelty hashing, if the worker renders one.
    fn frame(&self) -> Result<Option<Frame>, WorkerIoError>;

    /// Store the reward multiplier, a short rationale, and the milestone
    /// baseline on the worker. The worker applies the multiplier to its own
    /// locally computed base reward.
    fn set_reward_multiplier(
        &mut self,
        multiplier: f64,
        rationale: &str,
        milestone_baseline: u32,
    ) -> Result<(), WorkerIoError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerIoError {
    /// The call to the worker process failed outright.
    Transport { message: String },
    /// The worker answered but the requested field could not be produced.
    Unavailable { field: &'static str },
}

impl fmt::Display for WorkerIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerIoError::Transport { message } => {
                write!(f, "worker transport failed: {message}")
            }
            WorkerIoError::Unavailable { field } => {
                write!(f, "worker field unavailable: {field}")
            }
        }
    }
}

impl Error for WorkerIoError {}

// ============================================================================
// In-Process Worker
// ============================================================================

/// Single-process backend: the worker state lives in the same address space
/// and every call is a direct field access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InProcessWorker {
    pub id: String,
    pub position: Position,
    pub map_id: MapId,
    pub party: Vec<PartyMemberSummary>,
    pub badge_count: u8,
    pub milestone_count: u32,
    pub in_battle: bool,
    pub stationary_steps: u32,
    pub dialogue: String,
    #[serde(default)]
    pub frame: Option<Frame>,

    /// Last published multiplier; applied to the base reward by the worker.
    pub reward_multiplier: f64,
    pub reward_rationale: String,
    pub milestone_baseline: u32,
}

impl InProcessWorker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            position: (0, 0),
            map_id: String::new(),
            party: Vec::new(),
            badge_count: 0,
            milestone_count: 0,
            in_battle: false,
            stationary_steps: 0,
            dialogue: String::new(),
            frame: None,
            reward_multiplier: 1.0,
            reward_rationale: String::new(),
            milestone_baseline: 0,
        }
    }

    /// The shaped reward the worker would hand back to the training loop.
    pub fn shaped_reward(&self, base_reward: f64) -> f64 {
        base_reward * self.reward_multiplier
    }
}

impl WorkerHandle for InProcessWorker {
    fn worker_id(&self) -> &str {
        self.id.as_str()
    }

    fn position(&self) -> Result<Position, WorkerIoError> {
        Ok(self.position)
    }

    fn map_id(&self) -> Result<MapId, WorkerIoError> {
        if self.map_id.is_empty() {
            return Err(WorkerIoError::Unavailable { field: "map_id" });
        }
        Ok(self.map_id.clone())
    }

    fn party(&self) -> Result<Vec<PartyMemberSummary>, WorkerIoError> {
        Ok(self.party.clone())
    }

    fn badge_count(&self) -> Result<u8, WorkerIoError> {
        Ok(self.badge_count)
    }

    fn milestone_count(&self) -> Result<u32, WorkerIoError> {
        Ok(self.milestone_count)
    }

    fn in_battle(&self) -> Result<bool, WorkerIoError> {
        Ok(self.in_battle)
    }

    fn stationary_steps(&self) -> Result<u32, WorkerIoError> {
        Ok(self.stationary_steps)
    }

    fn dialogue_text(&self) -> Result<String, WorkerIoError> {
        Ok(self.dialogue.clone())
    }

    fn frame(&self) -> Result<Option<Frame>, WorkerIoError> {
        Ok(self.frame.clone())
    }

    fn set_reward_multiplier(
        &mut self,
        multiplier: f64,
        rationale: &str,
        milestone_baseline: u32,
    ) -> Result<(), WorkerIoError> {
        self.reward_multiplier = multiplier;
        self.reward_rationale = rationale.to_string();
        self.milestone_baseline = milestone_baseline;
        Ok(())
    }
}
