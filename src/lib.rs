//! Facility-Harvest: a resumable, bounded-concurrency harvest pipeline
//!
//! This crate processes a large, enumerable set of work items (facility IDs) under a
//! concurrency cap, records every terminal outcome in a durable checkpoint, and writes
//! results through an append-only sink so that a crashed run can be restarted without
//! reprocessing completed work or corrupting output.

pub mod checkpoint;
pub mod config;
pub mod fetch;
pub mod harvest;
pub mod output;
pub mod pipeline;
pub mod sink;
pub mod state;

use thiserror::Error;

/// Main error type for Facility-Harvest operations
///
/// Item-level failures never surface here; they are recorded in the checkpoint and the
/// run continues. Everything in this enum is fatal to the run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error("Output sink error: {0}")]
    Sink(#[from] sink::SinkError),

    #[error("Work source error: {0}")]
    Source(#[from] harvest::SourceError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run aborted: {reason}")]
    Aborted { reason: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid value '{value}' for environment variable {var}")]
    InvalidOverride { var: String, value: String },

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid URL template: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Facility-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use checkpoint::{CheckpointRecord, CheckpointSnapshot, CheckpointStore};
pub use config::Config;
pub use fetch::{RetryPolicy, RetryingFetcher};
pub use pipeline::{ItemError, ItemOutput, ItemProcessor, PipelineContext, RunSummary, Scheduler, WorkItem};
pub use sink::{OutputRow, RowSink, SinkMode};
pub use state::ItemStatus;
