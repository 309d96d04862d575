//! Resume behavior across restarts

use crate::common::*;
use facility_harvest::checkpoint::CheckpointStore;
use facility_harvest::pipeline::processor_fn;
use facility_harvest::{ItemError, ItemOutput, ItemStatus, OutputRow, Scheduler, WorkItem};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

fn id_processor() -> Arc<impl facility_harvest::ItemProcessor<()>> {
    Arc::new(processor_fn(["id", "note"], |item: WorkItem<()>| async move {
        Ok::<_, ItemError>(ItemOutput::row(OutputRow::new([item.id(), "ok"])))
    }))
}

/// Runs `items` until `stop_after` items have completed, then drops the run mid-item
async fn interrupted_run(dir: &TempDir, items: Vec<WorkItem<()>>, stop_after: usize) {
    let started = Arc::new(AtomicUsize::new(0));
    let stuck = Arc::new(Notify::new());

    let processor = {
        let started = started.clone();
        let stuck = stuck.clone();
        Arc::new(processor_fn(["id", "note"], move |item: WorkItem<()>| {
            let started = started.clone();
            let stuck = stuck.clone();
            async move {
                if started.fetch_add(1, Ordering::SeqCst) >= stop_after {
                    stuck.notify_one();
                    std::future::pending::<()>().await;
                }
                Ok::<_, ItemError>(ItemOutput::row(OutputRow::new([item.id(), "ok"])))
            }
        }))
    };

    let scheduler = Scheduler::new(log_context(dir, settings(1)));
    let handle = tokio::spawn(async move { scheduler.run(items, processor).await });

    stuck.notified().await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_second_run_is_noop() {
    let dir = TempDir::new().unwrap();

    let first = Scheduler::new(log_context(&dir, settings(4)))
        .run(numbered_items(20), id_processor())
        .await
        .unwrap();
    assert_eq!(first.completed, 20);
    let before = std::fs::read(csv_path(&dir)).unwrap();

    let second = Scheduler::new(log_context(&dir, settings(4)))
        .run(numbered_items(20), id_processor())
        .await
        .unwrap();

    assert!(second.is_noop());
    assert_eq!(second.skipped, 20);
    assert_eq!(std::fs::read(csv_path(&dir)).unwrap(), before);
}

#[tokio::test]
async fn test_resume_after_interruption_writes_each_item_once() {
    let dir = TempDir::new().unwrap();
    interrupted_run(&dir, numbered_items(50), 17).await;

    let snapshot = reload_log(&dir);
    assert_eq!(snapshot.count(ItemStatus::Completed), 17);
    assert_eq!(snapshot.status("item-017"), Some(ItemStatus::InProgress));
    assert_eq!(csv_ids(&csv_path(&dir)).len(), 17);

    let summary = Scheduler::new(log_context(&dir, settings(5)))
        .run(numbered_items(50), id_processor())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 17);
    assert_eq!(summary.orphaned, 1);
    assert_eq!(summary.completed, 33);

    let ids = csv_ids(&csv_path(&dir));
    assert_eq!(ids.len(), 50);
    assert_unique(&ids);
    assert_eq!(reload_log(&dir).count(ItemStatus::Completed), 50);
}

#[tokio::test]
async fn test_resume_discards_torn_output_row() {
    let dir = TempDir::new().unwrap();
    interrupted_run(&dir, numbered_items(30), 10).await;

    // A write cut short by the crash
    let mut file = OpenOptions::new().append(true).open(csv_path(&dir)).unwrap();
    file.write_all(b"item-010,o").unwrap();
    drop(file);

    Scheduler::new(log_context(&dir, settings(3)))
        .run(numbered_items(30), id_processor())
        .await
        .unwrap();

    let (header, rows) = read_csv(&csv_path(&dir));
    assert_eq!(header, vec!["id", "note"]);
    assert_eq!(rows.len(), 30);
    assert!(rows.iter().all(|row| row[1] == "ok"));
    assert_unique(&csv_ids(&csv_path(&dir)));
}

#[tokio::test]
async fn test_rows_of_item_left_in_progress_are_not_duplicated() {
    let dir = TempDir::new().unwrap();
    {
        // Rows were synced but the process died before marking the item completed
        let mut store = open_log(&dir);
        store.mark_completed("item-001").unwrap();
        store.mark_in_progress("item-000").unwrap();
        std::fs::write(csv_path(&dir), "id,note\nitem-001,ok\nitem-000,ok\n").unwrap();
    }

    let summary = Scheduler::new(log_context(&dir, settings(2)))
        .run(numbered_items(3), id_processor())
        .await
        .unwrap();

    assert_eq!(summary.orphaned, 1);
    assert_eq!(summary.completed, 2);

    let mut ids = csv_ids(&csv_path(&dir));
    assert_unique(&ids);
    ids.sort();
    assert_eq!(ids, vec!["item-000", "item-001", "item-002"]);
    assert_eq!(reload_log(&dir).count(ItemStatus::Completed), 3);
}

#[tokio::test]
async fn test_fresh_run_starts_over() {
    let dir = TempDir::new().unwrap();
    Scheduler::new(log_context(&dir, settings(2)))
        .run(numbered_items(10), id_processor())
        .await
        .unwrap();

    let mut fresh = settings(2);
    fresh.skip_completed = false;
    let summary = Scheduler::new(log_context(&dir, fresh))
        .run(numbered_items(4), id_processor())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.completed, 4);
    assert_eq!(csv_ids(&csv_path(&dir)).len(), 4);
    assert_eq!(reload_log(&dir).len(), 4);
}

#[tokio::test]
async fn test_sqlite_checkpoint_resumes() {
    let dir = TempDir::new().unwrap();
    Scheduler::new(sqlite_context(&dir, settings(3)))
        .run(numbered_items(12), id_processor())
        .await
        .unwrap();

    let summary = Scheduler::new(sqlite_context(&dir, settings(3)))
        .run(numbered_items(15), id_processor())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 12);
    assert_eq!(summary.completed, 3);
    let ids = csv_ids(&csv_path(&dir));
    assert_eq!(ids.len(), 15);
    assert_unique(&ids);
}
