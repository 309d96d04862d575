//! Checkpoint module for durable, resumable progress tracking
//!
//! This module records which work items have reached a terminal state so that an
//! interrupted run can resume without reprocessing completed work:
//! - `CheckpointStore`: the trait every backend implements
//! - `LogCheckpointStore`: append-only JSON-lines log (one record per transition)
//! - `SqliteCheckpointStore`: SQLite table upserted per transition, plus run tracking
//! - `CheckpointSnapshot`: the latest record per item, as loaded at startup

mod log_store;
mod schema;
mod sqlite;
mod traits;

pub use log_store::LogCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use traits::{CheckpointError, CheckpointResult, CheckpointStore};

use crate::config::{CheckpointBackend, CheckpointConfig};
use crate::state::ItemStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Opens the checkpoint backend selected by the configuration
///
/// # Arguments
///
/// * `config` - The checkpoint configuration
///
/// # Returns
///
/// * `Ok(Box<dyn CheckpointStore>)` - The opened store, with any prior state loaded
/// * `Err(CheckpointError)` - The checkpoint could not be opened or is corrupt
pub fn open_checkpoint(config: &CheckpointConfig) -> CheckpointResult<Box<dyn CheckpointStore>> {
    let path = Path::new(&config.path);
    let store: Box<dyn CheckpointStore> = match config.backend {
        CheckpointBackend::Log => Box::new(LogCheckpointStore::open(path)?),
        CheckpointBackend::Sqlite => Box::new(SqliteCheckpointStore::open(path)?),
    };
    Ok(store)
}

/// One status transition of one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The work item ID
    pub id: String,

    /// The status the item moved to
    pub status: ItemStatus,

    /// Failure reason, for `failed` records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the transition was recorded
    pub timestamp: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Creates a record stamped with the current time
    pub fn new(id: &str, status: ItemStatus, error: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            status,
            error: error.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

/// Status of a harvest run (recorded by backends that track runs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// The latest checkpoint record for every item ever attempted
///
/// Later records replace earlier ones for the same ID.
#[derive(Debug, Clone, Default)]
pub struct CheckpointSnapshot {
    records: HashMap<String, CheckpointRecord>,
}

impl CheckpointSnapshot {
    /// Builds a snapshot from records in the order they were written
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = CheckpointRecord>,
    {
        let mut snapshot = Self::default();
        for record in records {
            snapshot.apply(record);
        }
        snapshot
    }

    /// Applies a record, replacing any earlier record for the same ID
    ///
    /// Returns true if an earlier record was replaced.
    pub fn apply(&mut self, record: CheckpointRecord) -> bool {
        self.records.insert(record.id.clone(), record).is_some()
    }

    /// Forgets all records
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn get(&self, id: &str) -> Option<&CheckpointRecord> {
        self.records.get(id)
    }

    pub fn status(&self, id: &str) -> Option<ItemStatus> {
        self.records.get(id).map(|record| record.status)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over the latest record of every item
    pub fn records(&self) -> impl Iterator<Item = &CheckpointRecord> {
        self.records.values()
    }

    /// Counts items currently in the given status
    pub fn count(&self, status: ItemStatus) -> usize {
        self.records
            .values()
            .filter(|record| record.status == status)
            .count()
    }

    /// Returns the IDs of items currently in the given status
    pub fn ids_with_status(&self, status: ItemStatus) -> HashSet<String> {
        self.records
            .values()
            .filter(|record| record.status == status)
            .map(|record| record.id.clone())
            .collect()
    }

    pub fn completed_ids(&self) -> HashSet<String> {
        self.ids_with_status(ItemStatus::Completed)
    }

    pub fn failed_ids(&self) -> HashSet<String> {
        self.ids_with_status(ItemStatus::Failed)
    }

    /// Items left `in_progress` by a run that never finished them
    pub fn orphaned_ids(&self) -> HashSet<String> {
        self.ids_with_status(ItemStatus::InProgress)
    }

    /// IDs that a new run should not process again
    ///
    /// Always contains `completed` items; `failed` items are included only when
    /// `include_failed` is set.
    pub fn terminal_ids(&self, include_failed: bool) -> HashSet<String> {
        self.records
            .values()
            .filter(|record| match record.status {
                ItemStatus::Completed => true,
                ItemStatus::Failed => include_failed,
                ItemStatus::Pending | ItemStatus::InProgress => false,
            })
            .map(|record| record.id.clone())
            .collect()
    }

    /// Failed items and their reasons, sorted by ID
    pub fn failures(&self) -> Vec<(String, String)> {
        let mut failures: Vec<(String, String)> = self
            .records
            .values()
            .filter(|record| record.status == ItemStatus::Failed)
            .map(|record| {
                (
                    record.id.clone(),
                    record.error.clone().unwrap_or_default(),
                )
            })
            .collect();
        failures.sort();
        failures
    }

    /// Returns true if any prior run has touched any item
    pub fn has_progress(&self) -> bool {
        !self.records.is_empty()
    }
}
