//! Output module for inspecting harvest state
//!
//! This module handles:
//! - Printing checkpoint statistics (`--stats`)
//! - Exporting terminal outcomes as JSON (`--export-checkpoint`)

mod export;
pub mod stats;

pub use export::{export_checkpoint, CheckpointExport};
pub use stats::{load_statistics, print_statistics, CheckpointStatistics};
