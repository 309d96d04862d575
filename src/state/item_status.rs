/// Item status definitions for tracking harvest progress
///
/// This module defines the lifecycle of a single work item as recorded in the checkpoint.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a work item in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    // ===== Active States =====
    /// Item is known but has not been attempted
    Pending,

    /// Item is being processed (or was, when a crash orphaned it)
    InProgress,

    // ===== Terminal States =====
    /// Item was processed and its output rows are durably written
    Completed,

    /// Item failed permanently or exhausted its retries
    Failed,
}

impl ItemStatus {
    /// Returns true if this is a terminal state (no further processing in this run)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the item may still be processed
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    /// Returns true if moving from this state to `next` is a legal lifecycle step
    ///
    /// `Completed` is final. A `Failed` item may be picked up again by a later run, and an
    /// `InProgress` item may be restarted when a crash orphaned it.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        match self {
            Self::Completed => false,
            Self::Pending | Self::InProgress | Self::Failed => next != Self::Pending,
        }
    }

    /// Converts the status to its persisted string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its persisted string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::InProgress,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
