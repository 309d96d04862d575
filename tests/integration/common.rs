//! Shared helpers for the integration tests

use facility_harvest::checkpoint::{CheckpointStore, LogCheckpointStore, SqliteCheckpointStore};
use facility_harvest::pipeline::PipelineSettings;
use facility_harvest::sink::CsvSink;
use facility_harvest::{PipelineContext, WorkItem};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// `count` items with zero-padded IDs, so they sort in dispatch order
pub fn numbered_items(count: usize) -> Vec<WorkItem<()>> {
    (0..count)
        .map(|n| WorkItem::new(format!("item-{:03}", n), ()))
        .collect()
}

pub fn settings(concurrency: usize) -> PipelineSettings {
    PipelineSettings {
        concurrency,
        ..PipelineSettings::default()
    }
}

pub fn log_path(dir: &TempDir) -> PathBuf {
    dir.path().join("progress.log")
}

pub fn csv_path(dir: &TempDir) -> PathBuf {
    dir.path().join("out.csv")
}

/// Context over a log checkpoint and a CSV file in `dir`
///
/// Every call reopens both files, the way a restarted process would.
pub fn log_context(dir: &TempDir, settings: PipelineSettings) -> PipelineContext {
    let checkpoint = LogCheckpointStore::open(&log_path(dir)).unwrap();
    PipelineContext::new(
        settings,
        Box::new(checkpoint),
        Box::new(CsvSink::new(csv_path(dir))),
    )
}

/// Context over a SQLite checkpoint and a CSV file in `dir`
pub fn sqlite_context(dir: &TempDir, settings: PipelineSettings) -> PipelineContext {
    let checkpoint = SqliteCheckpointStore::open(&dir.path().join("progress.db")).unwrap();
    PipelineContext::new(
        settings,
        Box::new(checkpoint),
        Box::new(CsvSink::new(csv_path(dir))),
    )
}

/// CSV header and data rows
pub fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader.headers().unwrap().iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .map(|record| record.unwrap().iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}

/// First column of every data row
pub fn csv_ids(path: &Path) -> Vec<String> {
    read_csv(path).1.into_iter().map(|row| row[0].clone()).collect()
}

/// Asserts that every ID appears exactly once
pub fn assert_unique(ids: &[String]) {
    let mut sorted = ids.to_vec();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), ids.len(), "duplicate IDs in output: {:?}", ids);
}

pub fn open_log(dir: &TempDir) -> LogCheckpointStore {
    LogCheckpointStore::open(&log_path(dir)).unwrap()
}

/// Loads the checkpoint snapshot from a fresh handle
pub fn reload_log(dir: &TempDir) -> facility_harvest::CheckpointSnapshot {
    open_log(dir).load().unwrap()
}

/// Tracks how many processors are running at once
#[derive(Default)]
pub struct ActiveGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveGauge {
    pub fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard { gauge: self }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

pub struct GaugeGuard<'a> {
    gauge: &'a ActiveGauge,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}
