//! Incremental CSV writer
//!
//! The header is written once. Each `append` encodes all of one item's rows into a
//! buffer and writes it with a single call followed by `sync_data`, so a crash can only
//! ever leave the final, partially written item behind. On reopening in append mode
//! that partial tail is cut off before anything new is written.

use crate::sink::traits::{RowSink, SinkError, SinkResult};
use crate::sink::{OutputRow, SinkMode};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Append-only CSV output file
pub struct CsvSink {
    path: PathBuf,
    file: Option<File>,
    header: Vec<String>,
    rows_written: u64,
}

impl CsvSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            header: Vec::new(),
            rows_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_synced(file: &mut File, bytes: &[u8]) -> SinkResult<()> {
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }
}

impl RowSink for CsvSink {
    fn initialize(&mut self, header: &[String], mode: SinkMode) -> SinkResult<()> {
        if self.file.is_some() {
            if self.header.as_slice() == header {
                return Ok(());
            }
            return Err(SinkError::HeaderMismatch {
                expected: header.join(","),
                found: self.header.join(","),
            });
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = match mode {
            SinkMode::Fresh => {
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&self.path)?;
                OpenOptions::new().read(true).append(true).open(&self.path)?
            }
            SinkMode::Append => OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(&self.path)?,
        };

        let on_disk = file.metadata()?.len();
        let valid_len = match mode {
            SinkMode::Append => valid_prefix_len(&self.path, header.len())?,
            SinkMode::Fresh => 0,
        };

        // Check the header before cutting anything, so a wrong file is left untouched
        if valid_len > 0 {
            if let Some(existing) = read_header(&mut file)? {
                if existing.as_slice() != header {
                    return Err(SinkError::HeaderMismatch {
                        expected: header.join(","),
                        found: existing.join(","),
                    });
                }
            }
        }

        if valid_len < on_disk {
            tracing::warn!(
                "Truncating {} bytes of partial output at end of {}",
                on_disk - valid_len,
                self.path.display()
            );
            file.set_len(valid_len)?;
            file.sync_data()?;
        }

        if valid_len == 0 {
            let bytes = encode(std::iter::once(header), header.len())?;
            Self::write_synced(&mut file, &bytes)?;
        } else {
            tracing::debug!("Appending to existing output {}", self.path.display());
        }

        self.header = header.to_vec();
        self.file = Some(file);
        Ok(())
    }

    fn append(&mut self, _item_id: &str, rows: &[OutputRow]) -> SinkResult<()> {
        let file = self.file.as_mut().ok_or(SinkError::NotInitialized)?;
        if rows.is_empty() {
            return Ok(());
        }

        let bytes = encode(rows.iter().map(|row| row.values.as_slice()), self.header.len())?;
        Self::write_synced(file, &bytes)?;

        self.rows_written += rows.len() as u64;
        Ok(())
    }

    /// Drops rows whose `id` column names one of `ids`
    ///
    /// The kept rows are copied to a temporary file that replaces the output. Without
    /// an `id` column nothing can be attributed to an item and nothing is removed.
    fn discard_items(&mut self, ids: &HashSet<String>) -> SinkResult<usize> {
        if self.file.is_none() {
            return Err(SinkError::NotInitialized);
        }
        let Some(column) = self.header.iter().position(|name| name == "id") else {
            return Ok(0);
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let mut discarded = 0;
        for record in data_records(&self.path)?.byte_records() {
            if belongs_to(&record?, column, ids) {
                discarded += 1;
            }
        }
        if discarded == 0 {
            return Ok(0);
        }

        let temp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&temp)?;
            writer.write_record(&self.header)?;
            for record in data_records(&self.path)?.byte_records() {
                let record = record?;
                if !belongs_to(&record, column, ids) {
                    writer.write_byte_record(&record)?;
                }
            }
            let file = writer
                .into_inner()
                .map_err(|e| SinkError::Io(e.into_error()))?;
            file.sync_data()?;
        }
        fs::rename(&temp, &self.path)?;
        self.file = Some(OpenOptions::new().read(true).append(true).open(&self.path)?);

        tracing::debug!(
            "Removed {} rows of unfinished items from {}",
            discarded,
            self.path.display()
        );
        Ok(discarded)
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

/// Reader over the data rows of an existing output file
fn data_records(path: &Path) -> SinkResult<csv::Reader<File>> {
    Ok(csv::ReaderBuilder::new().flexible(true).from_path(path)?)
}

fn belongs_to(record: &csv::ByteRecord, column: usize, ids: &HashSet<String>) -> bool {
    record
        .get(column)
        .and_then(|value| std::str::from_utf8(value).ok())
        .map_or(false, |id| ids.contains(id))
}

/// Encodes records into one CSV buffer, checking each has `columns` values
fn encode<'a, I>(records: I, columns: usize) -> SinkResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        if record.len() != columns {
            return Err(SinkError::ColumnCount {
                expected: columns,
                found: record.len(),
            });
        }
        writer.write_record(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| SinkError::Io(e.into_error()))
}

/// Length of the output up to the end of its last complete row
///
/// A row is incomplete if the file does not end in a newline after it, or if it has
/// the wrong number of fields (a write cut off inside a quoted value). The header is
/// only checked for its newline; its contents are compared separately.
fn valid_prefix_len(path: &Path, columns: usize) -> SinkResult<u64> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last_byte = [0u8; 1];
    {
        let mut tail = &file;
        tail.seek(SeekFrom::End(-1))?;
        tail.read_exact(&mut last_byte)?;
        tail.seek(SeekFrom::Start(0))?;
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut record = csv::ByteRecord::new();
    let mut last_start = 0;
    let mut last_fields = 0;
    let mut records = 0usize;
    loop {
        let start = reader.position().byte();
        if !reader.read_byte_record(&mut record)? {
            break;
        }
        last_start = start;
        last_fields = record.len();
        records += 1;
    }

    if records == 0 {
        return Ok(0);
    }

    let last_is_header = records == 1;
    if last_byte[0] != b'\n' || (!last_is_header && last_fields != columns) {
        Ok(last_start)
    } else {
        Ok(len)
    }
}

/// Reads the first record of the file, if there is one
fn read_header(file: &mut File) -> SinkResult<Option<Vec<String>>> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(&mut *file);

    let mut record = csv::StringRecord::new();
    if reader.read_record(&mut record)? {
        Ok(Some(record.iter().map(str::to_string).collect()))
    } else {
        Ok(None)
    }
}
