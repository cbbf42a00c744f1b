//! Per-object task lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one object's check-and-repair task.
///
/// `Pending → Running → {Verified, VerifyFailed} → [Repairing → {Repaired,
/// RepairFailed}] → Done`. `Running` requires a checked-out client; an
/// acquire timeout moves a pending task straight to `VerifyFailed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Verified,
    VerifyFailed,
    Repairing,
    Repaired,
    RepairFailed,
    Done,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Verified => "verified",
            Self::VerifyFailed => "verify_failed",
            Self::Repairing => "repairing",
            Self::Repaired => "repaired",
            Self::RepairFailed => "repair_failed",
            Self::Done => "done",
        }
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, VerifyFailed)
                | (Running, Verified)
                | (Running, VerifyFailed)
                | (Verified, Repairing)
                | (Verified, Done)
                | (VerifyFailed, Done)
                | (Repairing, Repaired)
                | (Repairing, RepairFailed)
                | (Repaired, Done)
                | (RepairFailed, Done)
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::VerifyFailed | Self::RepairFailed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid task transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskState,
    pub to: TaskState,
}

/// Tracks one task through its lifecycle.
#[derive(Debug, Clone)]
pub struct ObjectTask {
    state: TaskState,
    /// Last state before `Done`.
    outcome: TaskState,
}

impl Default for ObjectTask {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTask {
    pub fn new() -> Self {
        Self {
            state: TaskState::Pending,
            outcome: TaskState::Pending,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// The state the task finished in, ignoring the final `Done`.
    pub fn outcome(&self) -> TaskState {
        self.outcome
    }

    pub fn advance(&mut self, next: TaskState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next != TaskState::Done {
            self.outcome = next;
        }
        Ok(())
    }

    /// Move to `Done` from any terminal outcome state.
    pub fn finish(&mut self) -> Result<(), InvalidTransition> {
        self.advance(TaskState::Done)
    }
}
