//! Concrete harvest collaborators used by the CLI
//!
//! - `FileWorkSource`: reads the facility work list from a CSV or JSON-lines file
//! - `DetailPageProcessor`: fetches each facility's detail page, extracts the
//!   configured fields and downloads linked inspection reports

mod processor;
mod source;

pub use processor::DetailPageProcessor;
pub use source::{FacilityPayload, FileWorkSource, WorkSource};

use thiserror::Error;

/// Errors reading the work list
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid record at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Record at line {line} has no '{field}' value")]
    MissingId { line: usize, field: String },

    #[error("Unsupported work list format: {0} (expected .csv or .jsonl)")]
    UnsupportedFormat(String),
}
