//! Sink traits and error types

use crate::sink::{OutputRow, SinkMode};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur while writing output
///
/// All of them abort the run: rows that cannot be written durably cannot be
/// checkpointed as completed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Existing output header [{found}] does not match columns [{expected}]")]
    HeaderMismatch { expected: String, found: String },

    #[error("Sink used before initialize()")]
    NotInitialized,

    #[error("Row has {found} values but the header has {expected} columns")]
    ColumnCount { expected: usize, found: usize },
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Trait for append-only output writers
///
/// Callers share one sink across workers behind a single lock; `append` for one item
/// runs to completion before the next starts.
pub trait RowSink: Send {
    /// Prepares the output for writing
    ///
    /// Idempotent. In `Append` mode an existing header is kept (and must match
    /// `header`); the header is written only when the output is new or empty.
    fn initialize(&mut self, header: &[String], mode: SinkMode) -> SinkResult<()>;

    /// Durably writes all rows produced by one item
    ///
    /// When this returns `Ok`, the rows are flushed to disk.
    fn append(&mut self, item_id: &str, rows: &[OutputRow]) -> SinkResult<()>;

    /// Removes output already written for the given items
    ///
    /// Called after `initialize` in `Append` mode with the IDs about to be processed
    /// again, so that rows left by an item that never reached `completed` are not
    /// duplicated. Returns how many rows or documents were removed.
    fn discard_items(&mut self, ids: &HashSet<String>) -> SinkResult<usize>;

    /// Rows written since this sink was opened
    fn rows_written(&self) -> u64;
}
