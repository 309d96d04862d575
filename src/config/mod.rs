//! Configuration module for Facility-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files, and
//! applying `HARVEST_*` environment overrides on top of them.
//!
//! # Example
//!
//! ```no_run
//! use facility_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting with concurrency {}", config.pipeline.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CheckpointBackend, CheckpointConfig, Config, FieldConfig, HarvestConfig, HttpConfig,
    OutputConfig, OutputFormat, PipelineConfig, ReportsConfig, RetryConfig, SourceConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash, parse_config,
};
pub use validation::validate;
