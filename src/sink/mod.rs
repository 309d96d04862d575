//! Append-only output sinks
//!
//! - `CsvSink`: one CSV file, header written once, each item's rows appended in one write
//! - `JsonFileSink`: one JSON document per item in a directory

mod csv_sink;
mod json_files;
mod traits;

pub use csv_sink::CsvSink;
pub use json_files::JsonFileSink;
pub use traits::{RowSink, SinkError, SinkResult};

use crate::config::{OutputConfig, OutputFormat};

/// One output row, values in header column order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub values: Vec<String>,
}

impl OutputRow {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Vec<String>> for OutputRow {
    fn from(values: Vec<String>) -> Self {
        Self { values }
    }
}

/// Whether to keep or discard output left by a previous run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Keep existing output and add to it
    Append,
    /// Start from empty output
    Fresh,
}

/// Creates the sink selected by the configuration
///
/// Nothing is opened until `initialize`.
pub fn open_sink(config: &OutputConfig) -> Box<dyn RowSink> {
    match config.format {
        OutputFormat::Csv => Box::new(CsvSink::new(&config.path)),
        OutputFormat::JsonFiles => Box::new(JsonFileSink::new(&config.path)),
    }
}

/// Makes an item ID safe to use as a file name
///
/// Bytes outside `[A-Za-z0-9_.-]` are written as `%XX`, and so is `%` itself, which
/// keeps distinct IDs on distinct names. Names made only of dots are escaped too.
pub fn sanitize_file_name(id: &str) -> String {
    if id.is_empty() {
        return "%".to_string();
    }

    let all_dots = id.bytes().all(|b| b == b'.');
    let mut name = String::with_capacity(id.len());
    for byte in id.bytes() {
        if (byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.')) && !all_dots {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name
}
