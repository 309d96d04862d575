//! Output integrity under concurrent appends

use crate::common::*;
use facility_harvest::pipeline::processor_fn;
use facility_harvest::sink::JsonFileSink;
use facility_harvest::{ItemError, ItemOutput, OutputRow, PipelineContext, Scheduler, WorkItem};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Three rows per item, with values that need CSV quoting
fn multi_row_processor() -> Arc<impl facility_harvest::ItemProcessor<()>> {
    Arc::new(processor_fn(
        ["id", "line", "text"],
        |item: WorkItem<()>| async move {
            // Vary completion order between items
            let jitter = item.id().bytes().map(u64::from).sum::<u64>() % 7;
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            let rows = (0..3)
                .map(|line| {
                    OutputRow::new([
                        item.id().to_string(),
                        line.to_string(),
                        format!("\"{}\", line {}\nsecond line", item.id(), line),
                    ])
                })
                .collect();
            Ok::<_, ItemError>(ItemOutput {
                rows,
                artifacts: Vec::new(),
            })
        },
    ))
}

#[tokio::test]
async fn test_concurrent_items_never_interleave_rows() {
    let dir = TempDir::new().unwrap();

    let summary = Scheduler::new(log_context(&dir, settings(10)))
        .run(numbered_items(50), multi_row_processor())
        .await
        .unwrap();
    assert_eq!(summary.rows_written, 150);

    let (header, rows) = read_csv(&csv_path(&dir));
    assert_eq!(header, vec!["id", "line", "text"]);
    assert_eq!(rows.len(), 150);

    for block in rows.chunks(3) {
        let id = &block[0][0];
        for (line, row) in block.iter().enumerate() {
            assert_eq!(&row[0], id, "rows of {} are interleaved with another item", id);
            assert_eq!(row[1], line.to_string());
            assert_eq!(row[2], format!("\"{}\", line {}\nsecond line", id, line));
        }
    }

    let ids: Vec<String> = rows.chunks(3).map(|block| block[0][0].clone()).collect();
    assert_unique(&ids);
}

#[tokio::test]
async fn test_json_files_sink_writes_one_document_per_item() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("documents");
    let ctx = PipelineContext::new(
        settings(4),
        Box::new(open_log(&dir)),
        Box::new(JsonFileSink::new(&out)),
    );

    let summary = Scheduler::new(ctx)
        .run(numbered_items(12), multi_row_processor())
        .await
        .unwrap();
    assert_eq!(summary.completed, 12);

    let documents: Vec<_> = std::fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(documents.len(), 12);
    assert!(documents
        .iter()
        .all(|path| path.extension().map_or(false, |ext| ext == "json")));

    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.join("item-004.json")).unwrap()).unwrap();
    assert_eq!(doc["id"], "item-004");
    assert_eq!(doc["rows"].as_array().unwrap().len(), 3);
    assert_eq!(doc["rows"][2]["line"], "2");
}
