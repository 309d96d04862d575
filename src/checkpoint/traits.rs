//! Checkpoint traits and error types
//!
//! This module defines the trait interface for checkpoint backends and
//! associated error types.

use crate::checkpoint::{CheckpointSnapshot, RunRecord, RunStatus};
use crate::state::ItemStatus;
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during checkpoint operations
///
/// Every one of these is fatal to a run: if progress cannot be recorded durably the
/// pipeline can no longer promise a correct resume.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt checkpoint record at line {line}: {message}")]
    Corrupt { line: usize, message: String },

    #[error("Corrupt checkpoint row {id} in {table}: {message}")]
    CorruptRow {
        table: &'static str,
        id: String,
        message: String,
    },

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ItemStatus,
        to: ItemStatus,
    },
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Trait for checkpoint backend implementations
///
/// Methods take `&mut self`; callers that share a store across workers serialize access
/// through a single lock, so each record update is written whole before the next begins.
pub trait CheckpointStore: Send {
    /// Loads the latest record for every item ever attempted
    ///
    /// Called once at pipeline startup.
    fn load(&mut self) -> CheckpointResult<CheckpointSnapshot>;

    /// Records that an item has been picked up
    ///
    /// Observability only; callers may skip it or ignore its failure.
    fn mark_in_progress(&mut self, id: &str) -> CheckpointResult<()>;

    /// Durably records that an item completed
    fn mark_completed(&mut self, id: &str) -> CheckpointResult<()>;

    /// Durably records that an item failed, with the reason for later inspection
    fn mark_failed(&mut self, id: &str, reason: &str) -> CheckpointResult<()>;

    /// Forgets all item records (used for fresh runs)
    fn reset(&mut self) -> CheckpointResult<()>;

    /// Latest recorded status of one item, if it has any record
    fn status(&mut self, id: &str) -> CheckpointResult<Option<ItemStatus>> {
        Ok(self.load()?.status(id))
    }

    /// Returns the IDs that are in a terminal state
    ///
    /// `completed` IDs are always included; `failed` IDs only when `include_failed` is set.
    fn load_terminal_ids(&mut self, include_failed: bool) -> CheckpointResult<HashSet<String>> {
        Ok(self.load()?.terminal_ids(include_failed))
    }

    // ===== Run Tracking =====

    /// Records the start of a run
    fn begin_run(&mut self, _config_hash: &str) -> CheckpointResult<()> {
        Ok(())
    }

    /// Records the end of the current run
    fn finish_run(&mut self, _status: RunStatus) -> CheckpointResult<()> {
        Ok(())
    }

    /// Gets the most recent run, for backends that track runs
    fn latest_run(&self) -> CheckpointResult<Option<RunRecord>> {
        Ok(None)
    }
}

/// Rejects transitions the item lifecycle does not allow
///
/// An item with no record is treated as `pending`.
pub(crate) fn check_transition(
    id: &str,
    current: Option<ItemStatus>,
    next: ItemStatus,
) -> CheckpointResult<()> {
    let from = current.unwrap_or(ItemStatus::Pending);
    if from.can_transition_to(next) {
        Ok(())
    } else {
        Err(CheckpointError::InvalidTransition {
            id: id.to_string(),
            from,
            to: next,
        })
    }
}
