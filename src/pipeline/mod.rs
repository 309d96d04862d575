//! The resumable harvest pipeline
//!
//! - `WorkItem` / `ItemProcessor`: what is processed and how
//! - `PipelineContext`: per-run state (checkpoint, sink, progress) shared by workers
//! - `Scheduler`: checkpoint-filtered, bounded-concurrency execution
//! - `ProgressTracker`: periodic progress lines

mod context;
mod item;
mod progress;
mod scheduler;

pub use context::{PipelineContext, PipelineSettings};
pub use item::{processor_fn, FnProcessor, ItemError, ItemOutput, ItemProcessor, WorkItem};
pub use progress::{format_eta, ProgressSnapshot, ProgressTracker};
pub use scheduler::{RunSummary, Scheduler};
