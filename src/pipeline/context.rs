//! Per-run pipeline state
//!
//! `PipelineContext` owns everything a run mutates: the checkpoint store, the output
//! sink and the progress counters. It is built once per run and cloned into every
//! worker; the checkpoint and the sink each sit behind one lock, which makes each of
//! them a single-writer queue.

use crate::checkpoint::{open_checkpoint, CheckpointResult, CheckpointSnapshot, CheckpointStore};
use crate::config::{Config, PipelineConfig};
use crate::pipeline::progress::ProgressTracker;
use crate::sink::{open_sink, OutputRow, RowSink, SinkResult};
use crate::HarvestError;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Scheduler behavior for one run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub skip_completed: bool,
    pub retry_failed: bool,
    pub record_in_progress: bool,
    pub progress_every: usize,
    /// Recorded with the run by backends that track runs
    pub config_hash: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            skip_completed: config.skip_completed,
            retry_failed: config.retry_failed,
            record_in_progress: config.record_in_progress,
            progress_every: config.progress_every,
            config_hash: None,
        }
    }
}

/// Shared state of one pipeline run
#[derive(Clone)]
pub struct PipelineContext {
    settings: Arc<PipelineSettings>,
    checkpoint: Arc<Mutex<Box<dyn CheckpointStore>>>,
    sink: Arc<Mutex<Box<dyn RowSink>>>,
    progress: Arc<ProgressTracker>,
}

impl PipelineContext {
    pub fn new(
        settings: PipelineSettings,
        checkpoint: Box<dyn CheckpointStore>,
        sink: Box<dyn RowSink>,
    ) -> Self {
        let progress = Arc::new(ProgressTracker::new(settings.progress_every));
        Self {
            settings: Arc::new(settings),
            checkpoint: Arc::new(Mutex::new(checkpoint)),
            sink: Arc::new(Mutex::new(sink)),
            progress,
        }
    }

    /// Opens the configured checkpoint and sink
    ///
    /// # Arguments
    ///
    /// * `config` - The loaded configuration
    /// * `config_hash` - Hash of the configuration file, recorded with the run
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineContext)` - Ready to run
    /// * `Err(HarvestError)` - The checkpoint could not be opened
    pub fn from_config(config: &Config, config_hash: Option<String>) -> Result<Self, HarvestError> {
        let checkpoint = open_checkpoint(&config.checkpoint)?;
        let sink = open_sink(&config.output);

        let mut settings = PipelineSettings::from(&config.pipeline);
        settings.config_hash = config_hash;

        Ok(Self::new(settings, checkpoint, sink))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Runs `f` with exclusive access to the checkpoint store
    pub async fn with_checkpoint<R>(&self, f: impl FnOnce(&mut dyn CheckpointStore) -> R) -> R {
        let mut store = self.checkpoint.lock().await;
        f(&mut **store)
    }

    /// Runs `f` with exclusive access to the sink
    pub async fn with_sink<R>(&self, f: impl FnOnce(&mut dyn RowSink) -> R) -> R {
        let mut sink = self.sink.lock().await;
        f(&mut **sink)
    }

    /// Loads the current checkpoint state
    pub async fn snapshot(&self) -> CheckpointResult<CheckpointSnapshot> {
        self.with_checkpoint(|store| store.load()).await
    }

    /// Records that an item was picked up, if enabled
    ///
    /// Best-effort: a failure is logged and otherwise ignored.
    pub async fn mark_in_progress(&self, id: &str) {
        if !self.settings.record_in_progress {
            return;
        }
        if let Err(e) = self.with_checkpoint(|store| store.mark_in_progress(id)).await {
            tracing::warn!(item_id = %id, "Could not record in-progress marker: {}", e);
        }
    }

    pub async fn mark_completed(&self, id: &str) -> CheckpointResult<()> {
        self.with_checkpoint(|store| store.mark_completed(id)).await
    }

    pub async fn mark_failed(&self, id: &str, reason: &str) -> CheckpointResult<()> {
        self.with_checkpoint(|store| store.mark_failed(id, reason))
            .await
    }

    /// Appends one item's rows as a single write
    pub async fn append_rows(&self, id: &str, rows: &[OutputRow]) -> SinkResult<()> {
        self.with_sink(|sink| sink.append(id, rows)).await
    }

    pub async fn rows_written(&self) -> u64 {
        self.with_sink(|sink| sink.rows_written()).await
    }
}
