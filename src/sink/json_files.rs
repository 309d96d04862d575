//! One JSON document per item
//!
//! `<dir>/<sanitized-id>.json` holds `{ "id": ..., "rows": [ { column: value } ] }`.
//! Each document is written to a temporary file and renamed into place, so a reader
//! never sees a half-written document.

use crate::sink::traits::{RowSink, SinkError, SinkResult};
use crate::sink::{sanitize_file_name, OutputRow, SinkMode};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory of per-item JSON documents
pub struct JsonFileSink {
    dir: PathBuf,
    header: Option<Vec<String>>,
    rows_written: u64,
}

impl JsonFileSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            header: None,
            rows_written: 0,
        }
    }

    /// Path of the document for one item
    pub fn document_path(&self, item_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_file_name(item_id)))
    }

    fn clear_documents(&self) -> SinkResult<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json" || ext == "tmp") {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

impl RowSink for JsonFileSink {
    fn initialize(&mut self, header: &[String], mode: SinkMode) -> SinkResult<()> {
        if let Some(existing) = &self.header {
            if existing.as_slice() == header {
                return Ok(());
            }
            return Err(SinkError::HeaderMismatch {
                expected: header.join(","),
                found: existing.join(","),
            });
        }

        fs::create_dir_all(&self.dir)?;
        if mode == SinkMode::Fresh {
            self.clear_documents()?;
        }

        self.header = Some(header.to_vec());
        Ok(())
    }

    fn append(&mut self, item_id: &str, rows: &[OutputRow]) -> SinkResult<()> {
        let header = self.header.as_ref().ok_or(SinkError::NotInitialized)?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            if row.values.len() != header.len() {
                return Err(SinkError::ColumnCount {
                    expected: header.len(),
                    found: row.values.len(),
                });
            }
            let object: Map<String, Value> = header
                .iter()
                .zip(&row.values)
                .map(|(column, value)| (column.clone(), Value::String(value.clone())))
                .collect();
            objects.push(Value::Object(object));
        }

        let document = json!({ "id": item_id, "rows": objects });
        let bytes = serde_json::to_vec_pretty(&document)?;

        let path = self.document_path(item_id);
        let temp = path.with_extension("json.tmp");
        {
            let mut file = File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;

        self.rows_written += rows.len() as u64;
        Ok(())
    }

    fn discard_items(&mut self, ids: &HashSet<String>) -> SinkResult<usize> {
        if self.header.is_none() {
            return Err(SinkError::NotInitialized);
        }

        let mut removed = 0;
        for id in ids {
            let path = self.document_path(id);
            if path.exists() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }
}
