//! Append-only checkpoint log
//!
//! Each status transition is one JSON object on its own line, appended with a single
//! write and synced before the call returns. The loader replays the log (later lines
//! win) and discards a truncated final line left by a crash mid-write. Bare lines that
//! are not JSON are read as `completed` IDs, which is the format of the plain
//! `id\n` progress files older harvesters wrote.

use crate::checkpoint::traits::{check_transition, CheckpointError, CheckpointResult};
use crate::checkpoint::{CheckpointRecord, CheckpointSnapshot, CheckpointStore};
use crate::state::ItemStatus;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Append-only JSON-lines checkpoint backend
pub struct LogCheckpointStore {
    path: PathBuf,
    file: File,
    snapshot: CheckpointSnapshot,
    /// Lines in the log that a later line for the same ID has replaced
    superseded: usize,
}

/// Result of replaying a log file
#[derive(Debug, Default)]
struct Replay {
    snapshot: CheckpointSnapshot,
    superseded: usize,
    /// Length of the log up to and including its last complete line
    valid_len: u64,
}

impl LogCheckpointStore {
    /// Opens (or creates) a checkpoint log and replays it
    ///
    /// A partial trailing line is truncated away so later appends start on a clean
    /// line boundary.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the log file
    ///
    /// # Returns
    ///
    /// * `Ok(LogCheckpointStore)` - The store, with prior records loaded
    /// * `Err(CheckpointError)` - The log could not be read or a complete line is corrupt
    pub fn open(path: &Path) -> CheckpointResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let replay = replay_log(path)?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if replay.valid_len < on_disk {
            tracing::warn!(
                "Discarding {} bytes of partial record at end of {}",
                on_disk - replay.valid_len,
                path.display()
            );
            file.set_len(replay.valid_len)?;
            file.sync_data()?;
        }

        tracing::debug!(
            "Loaded {} checkpoint records from {}",
            replay.snapshot.len(),
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            snapshot: replay.snapshot,
            superseded: replay.superseded,
        })
    }

    /// Returns the path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the log with one line per item
    ///
    /// The new log is written to a temporary file, synced, and renamed over the old one.
    ///
    /// # Returns
    ///
    /// The number of superseded lines that were dropped
    pub fn compact(&mut self) -> CheckpointResult<usize> {
        let temp_path = self.path.with_extension("compact.tmp");

        let mut records: Vec<&CheckpointRecord> = self.snapshot.records().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(&buffer)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;

        let dropped = self.superseded;
        self.superseded = 0;
        tracing::debug!(
            "Compacted {}: dropped {} superseded records",
            self.path.display(),
            dropped
        );
        Ok(dropped)
    }

    /// Appends one record and syncs it to disk
    fn append(&mut self, record: CheckpointRecord) -> CheckpointResult<()> {
        check_transition(&record.id, self.snapshot.status(&record.id), record.status)?;

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;

        if self.snapshot.apply(record) {
            self.superseded += 1;
        }
        Ok(())
    }
}

impl CheckpointStore for LogCheckpointStore {
    fn load(&mut self) -> CheckpointResult<CheckpointSnapshot> {
        // More dead lines than live ones: worth rewriting before the run adds more
        if self.superseded > self.snapshot.len() {
            self.compact()?;
        }
        Ok(self.snapshot.clone())
    }

    fn status(&mut self, id: &str) -> CheckpointResult<Option<ItemStatus>> {
        Ok(self.snapshot.status(id))
    }

    fn mark_in_progress(&mut self, id: &str) -> CheckpointResult<()> {
        self.append(CheckpointRecord::new(id, ItemStatus::InProgress, None))
    }

    fn mark_completed(&mut self, id: &str) -> CheckpointResult<()> {
        self.append(CheckpointRecord::new(id, ItemStatus::Completed, None))
    }

    fn mark_failed(&mut self, id: &str, reason: &str) -> CheckpointResult<()> {
        self.append(CheckpointRecord::new(id, ItemStatus::Failed, Some(reason)))
    }

    fn reset(&mut self) -> CheckpointResult<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.snapshot.clear();
        self.superseded = 0;
        Ok(())
    }
}

/// Replays a log file into a snapshot
///
/// A missing file is an empty log. Bytes after the last newline are a partial record
/// and are ignored. A complete line that cannot be parsed is corruption.
fn replay_log(path: &Path) -> CheckpointResult<Replay> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Replay::default()),
        Err(e) => return Err(e.into()),
    };

    let complete_len = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|index| index + 1)
        .unwrap_or(0);

    let mut replay = Replay {
        valid_len: complete_len as u64,
        ..Replay::default()
    };

    for (index, raw) in bytes[..complete_len].split(|&b| b == b'\n').enumerate() {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = parse_line(line).map_err(|message| CheckpointError::Corrupt {
            line: index + 1,
            message,
        })?;

        if replay.snapshot.apply(record) {
            replay.superseded += 1;
        }
    }

    Ok(replay)
}

/// Parses one complete log line
fn parse_line(line: &str) -> Result<CheckpointRecord, String> {
    if line.starts_with('{') {
        return serde_json::from_str(line).map_err(|e| e.to_string());
    }

    // Legacy progress file: one completed ID per line
    Ok(CheckpointRecord {
        id: line.to_string(),
        status: ItemStatus::Completed,
        error: None,
        timestamp: Utc::now(),
    })
}
