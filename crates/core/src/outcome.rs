//! Repair outcomes and warehouse reference status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a repair did not write anything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Storage state already satisfies the invariant.
    AlreadyCorrect,
    /// Dry-run mode.
    DryRun,
    /// Replacing an existing value requires `overwrite`.
    NeedsOverwrite,
}

impl SkipReason {
    /// True if the skip means the violation no longer holds.
    pub fn resolves(&self) -> bool {
        matches!(self, Self::AlreadyCorrect)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyCorrect => f.write_str("already correct"),
            Self::DryRun => f.write_str("dry run"),
            Self::NeedsOverwrite => f.write_str("overwrite not enabled"),
        }
    }
}

/// Result of attempting one repair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RepairOutcome {
    Succeeded,
    Skipped(SkipReason),
    /// The repair was refused or a write failed.
    Failed(String),
}

impl RepairOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    /// True if the violation this outcome answers is no longer present.
    pub fn resolves(&self) -> bool {
        match self {
            Self::Succeeded => true,
            Self::Skipped(reason) => reason.resolves(),
            Self::Failed(_) => false,
        }
    }
}

impl fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Whether a warehouse reference was available for an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Found,
    /// The warehouse has no record for the object's key.
    Absent,
    /// The warehouse could not be queried.
    Unavailable,
    /// The object carries no key to look up, or no warehouse is configured.
    NoKey,
}

impl ReferenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "found",
            Self::Absent => "absent",
            Self::Unavailable => "unavailable",
            Self::NoKey => "no_key",
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found)
    }
}
