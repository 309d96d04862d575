//! Concurrency limit enforcement

use crate::common::*;
use facility_harvest::pipeline::processor_fn;
use facility_harvest::{ItemError, ItemOutput, OutputRow, Scheduler, WorkItem};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Runs 100 items that each take 10ms and returns the peak number running at once
async fn peak_concurrency(limit: usize) -> usize {
    let dir = TempDir::new().unwrap();
    let gauge = Arc::new(ActiveGauge::default());

    let processor = {
        let gauge = gauge.clone();
        Arc::new(processor_fn(["id"], move |item: WorkItem<()>| {
            let gauge = gauge.clone();
            async move {
                let _active = gauge.enter();
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, ItemError>(ItemOutput::row(OutputRow::new([item.id()])))
            }
        }))
    };

    let summary = Scheduler::new(log_context(&dir, settings(limit)))
        .run(numbered_items(100), processor)
        .await
        .unwrap();

    assert_eq!(summary.completed, 100);
    assert_eq!(gauge.current(), 0);
    let ids = csv_ids(&csv_path(&dir));
    assert_eq!(ids.len(), 100);
    assert_unique(&ids);

    gauge.peak()
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_of_one_is_sequential() {
    assert_eq!(peak_concurrency(1).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_of_five() {
    assert_eq!(peak_concurrency(5).await, 5);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_of_twenty() {
    assert_eq!(peak_concurrency(20).await, 20);
}

#[tokio::test(start_paused = true)]
async fn test_limit_above_item_count() {
    let dir = TempDir::new().unwrap();
    let gauge = Arc::new(ActiveGauge::default());

    let processor = {
        let gauge = gauge.clone();
        Arc::new(processor_fn(["id"], move |item: WorkItem<()>| {
            let gauge = gauge.clone();
            async move {
                let _active = gauge.enter();
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, ItemError>(ItemOutput::row(OutputRow::new([item.id()])))
            }
        }))
    };

    let summary = Scheduler::new(log_context(&dir, settings(50)))
        .run(numbered_items(7), processor)
        .await
        .unwrap();

    assert_eq!(summary.completed, 7);
    assert_eq!(gauge.peak(), 7);
}
