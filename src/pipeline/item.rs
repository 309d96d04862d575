//! Work items and the processor interface

use crate::fetch::FetchError;
use crate::sink::OutputRow;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;

/// One unit of work, identified solely by its ID
///
/// Immutable once created. Two items with the same ID are the same task.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem<T = serde_json::Value> {
    id: String,
    payload: T,
}

impl<T> WorkItem<T> {
    pub fn new(id: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// What processing one item produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemOutput {
    /// Rows to append to the sink, in order
    pub rows: Vec<OutputRow>,

    /// Files written as a side effect (downloaded reports)
    pub artifacts: Vec<PathBuf>,
}

impl ItemOutput {
    /// Output consisting of a single row
    pub fn row(row: OutputRow) -> Self {
        Self {
            rows: vec![row],
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Why an item could not be processed
///
/// Every variant is recorded as a failure for that item; none of them stop the run.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("missing data: {0}")]
    MissingData(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Turns one work item into output rows
///
/// Implementations are shared across workers and called concurrently.
pub trait ItemProcessor<T>: Send + Sync + 'static {
    /// Column names of every row this processor produces
    fn columns(&self) -> Vec<String>;

    /// Processes one item: fetch, parse, download, build rows
    fn process(
        &self,
        item: &WorkItem<T>,
    ) -> impl Future<Output = Result<ItemOutput, ItemError>> + Send;
}

/// An [`ItemProcessor`] built from a closure
pub struct FnProcessor<F> {
    columns: Vec<String>,
    f: F,
}

/// Wraps an async closure as a processor
///
/// The closure receives its own clone of each item.
///
/// # Example
///
/// ```
/// use facility_harvest::pipeline::{processor_fn, ItemError, ItemOutput, WorkItem};
/// use facility_harvest::sink::OutputRow;
///
/// let processor = processor_fn(["id"], |item: WorkItem<()>| async move {
///     Ok::<_, ItemError>(ItemOutput::row(OutputRow::new([item.id()])))
/// });
/// ```
pub fn processor_fn<T, F, Fut, C, S>(columns: C, f: F) -> FnProcessor<F>
where
    C: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn(WorkItem<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ItemOutput, ItemError>> + Send,
{
    FnProcessor {
        columns: columns.into_iter().map(Into::into).collect(),
        f,
    }
}

impl<T, F, Fut> ItemProcessor<T> for FnProcessor<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(WorkItem<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ItemOutput, ItemError>> + Send,
{
    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn process(
        &self,
        item: &WorkItem<T>,
    ) -> impl Future<Output = Result<ItemOutput, ItemError>> + Send {
        (self.f)(item.clone())
    }
}
