//! Item failure isolation and retry

use crate::common::*;
use facility_harvest::checkpoint::CheckpointStore;
use facility_harvest::fetch::{FetchError, OperationError};
use facility_harvest::pipeline::{processor_fn, PipelineSettings};
use facility_harvest::sink::{RowSink, SinkError, SinkMode, SinkResult};
use facility_harvest::{
    HarvestError, ItemError, ItemOutput, ItemStatus, OutputRow, PipelineContext, RetryPolicy,
    RetryingFetcher, Scheduler, WorkItem,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn failing_on(bad: &'static str) -> Arc<impl facility_harvest::ItemProcessor<()>> {
    Arc::new(processor_fn(["id"], move |item: WorkItem<()>| async move {
        if item.id() == bad {
            return Err(ItemError::NotFound(format!("facility {}", item.id())));
        }
        Ok(ItemOutput::row(OutputRow::new([item.id()])))
    }))
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_run() {
    let dir = TempDir::new().unwrap();

    let summary = Scheduler::new(log_context(&dir, settings(8)))
        .run(numbered_items(100), failing_on("item-042"))
        .await
        .unwrap();

    assert_eq!(summary.completed, 99);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.rows_written, 99);

    let ids = csv_ids(&csv_path(&dir));
    assert_eq!(ids.len(), 99);
    assert!(!ids.contains(&"item-042".to_string()));

    let snapshot = reload_log(&dir);
    assert_eq!(snapshot.status("item-042"), Some(ItemStatus::Failed));
    assert_eq!(
        snapshot.failures(),
        vec![(
            "item-042".to_string(),
            "not found: facility item-042".to_string()
        )]
    );
}

#[tokio::test]
async fn test_panicking_item_is_recorded_as_failed() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(processor_fn(["id"], |item: WorkItem<()>| async move {
        if item.id() == "item-003" {
            panic!("selector blew up");
        }
        Ok::<_, ItemError>(ItemOutput::row(OutputRow::new([item.id()])))
    }));

    let summary = Scheduler::new(log_context(&dir, settings(3)))
        .run(numbered_items(10), processor)
        .await
        .unwrap();

    assert_eq!(summary.completed, 9);
    assert_eq!(summary.failed, 1);
    let record = reload_log(&dir).get("item-003").cloned().unwrap();
    assert_eq!(record.status, ItemStatus::Failed);
    assert!(record.error.unwrap().contains("selector blew up"));
}

#[tokio::test]
async fn test_short_row_fails_its_item_and_keeps_csv_aligned() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(processor_fn(["id", "name"], |item: WorkItem<()>| async move {
        if item.id() == "item-001" {
            return Ok::<_, ItemError>(ItemOutput::row(OutputRow::new([item.id()])));
        }
        Ok(ItemOutput::row(OutputRow::new([item.id(), "Riverside Plant"])))
    }));

    let summary = Scheduler::new(log_context(&dir, settings(2)))
        .run(numbered_items(4), processor)
        .await
        .unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 1);

    let (header, rows) = read_csv(&csv_path(&dir));
    assert_eq!(header, vec!["id", "name"]);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.len() == 2));

    let record = reload_log(&dir).get("item-001").cloned().unwrap();
    assert_eq!(record.status, ItemStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("row has 1 values, expected 2"));
}

#[tokio::test]
async fn test_failed_items_retried_only_when_enabled() {
    let dir = TempDir::new().unwrap();
    Scheduler::new(log_context(&dir, settings(4)))
        .run(numbered_items(10), failing_on("item-005"))
        .await
        .unwrap();

    let mut keep_failed = settings(4);
    keep_failed.retry_failed = false;
    let summary = Scheduler::new(log_context(&dir, keep_failed))
        .run(numbered_items(10), failing_on("none"))
        .await
        .unwrap();
    assert!(summary.is_noop());
    assert_eq!(summary.skipped, 10);

    let summary = Scheduler::new(log_context(&dir, settings(4)))
        .run(numbered_items(10), failing_on("none"))
        .await
        .unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(reload_log(&dir).status("item-005"), Some(ItemStatus::Completed));
    assert_eq!(csv_ids(&csv_path(&dir)).len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried_with_backoff() {
    let dir = TempDir::new().unwrap();
    let calls: Arc<Mutex<HashMap<String, u32>>> = Arc::default();
    let fetcher = RetryingFetcher::new(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        attempt_timeout: None,
    });

    let processor = {
        let calls = calls.clone();
        Arc::new(processor_fn(["id"], move |item: WorkItem<()>| {
            let calls = calls.clone();
            let fetcher = fetcher.clone();
            async move {
                let id = item.id().to_string();
                fetcher
                    .execute(|| {
                        let calls = calls.clone();
                        let id = id.clone();
                        async move {
                            let mut calls = calls.lock().unwrap();
                            let count = calls.entry(id).or_insert(0);
                            *count += 1;
                            if *count <= 2 {
                                Err(OperationError::transient("HTTP 503"))
                            } else {
                                Ok(())
                            }
                        }
                    })
                    .await?;
                Ok::<_, ItemError>(ItemOutput::row(OutputRow::new([item.id()])))
            }
        }))
    };

    let started = tokio::time::Instant::now();
    let summary = Scheduler::new(log_context(&dir, settings(2)))
        .run(numbered_items(4), processor)
        .await
        .unwrap();

    assert_eq!(summary.completed, 4);
    assert!(calls.lock().unwrap().values().all(|count| *count == 3));
    // 100ms then 200ms of backoff per item, two items at a time
    assert!(started.elapsed() >= Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_the_item() {
    let dir = TempDir::new().unwrap();
    let fetcher = RetryingFetcher::new(RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(50),
        attempt_timeout: None,
    });

    let processor = Arc::new(processor_fn(["id"], move |item: WorkItem<()>| {
        let fetcher = fetcher.clone();
        async move {
            let result: Result<(), FetchError> = fetcher
                .execute(|| async { Err(OperationError::transient("connection reset")) })
                .await;
            result?;
            Ok::<_, ItemError>(ItemOutput::row(OutputRow::new([item.id()])))
        }
    }));

    let summary = Scheduler::new(log_context(&dir, settings(1)))
        .run(numbered_items(1), processor)
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    let reason = reload_log(&dir).get("item-000").cloned().unwrap().error.unwrap();
    assert_eq!(reason, "gave up after 2 attempts: connection reset");
}

/// Accepts a fixed number of appends, then fails like a full disk
struct FailingSink {
    remaining: u32,
}

impl RowSink for FailingSink {
    fn initialize(&mut self, _header: &[String], _mode: SinkMode) -> SinkResult<()> {
        Ok(())
    }

    fn append(&mut self, _item_id: &str, _rows: &[OutputRow]) -> SinkResult<()> {
        if self.remaining == 0 {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left on device",
            )));
        }
        self.remaining -= 1;
        Ok(())
    }

    fn discard_items(&mut self, _ids: &HashSet<String>) -> SinkResult<usize> {
        Ok(0)
    }

    fn rows_written(&self) -> u64 {
        0
    }
}

#[tokio::test]
async fn test_sink_failure_aborts_the_run() {
    let dir = TempDir::new().unwrap();
    let ctx = PipelineContext::new(
        PipelineSettings {
            concurrency: 1,
            ..PipelineSettings::default()
        },
        Box::new(open_log(&dir)),
        Box::new(FailingSink { remaining: 3 }),
    );

    let result = Scheduler::new(ctx)
        .run(numbered_items(10), failing_on("none"))
        .await;

    assert!(matches!(result, Err(HarvestError::Sink(_))));

    let mut store = open_log(&dir);
    let snapshot = store.load().unwrap();
    assert_eq!(snapshot.count(ItemStatus::Completed), 3);
    // The item whose rows were lost is not marked done
    assert_ne!(snapshot.status("item-003"), Some(ItemStatus::Completed));
}
