use crate::config::SourceConfig;
use crate::harvest::SourceError;
use crate::pipeline::WorkItem;
use serde_json::{Map, Value};
use std::future::Future;
use std::path::{Path, PathBuf};

/// Everything the work list says about one facility, keyed by column
pub type FacilityPayload = Map<String, Value>;

/// Supplies the complete work list before a run starts
pub trait WorkSource<T> {
    fn load(&self) -> impl Future<Output = Result<Vec<WorkItem<T>>, SourceError>> + Send;
}

/// Work list read from a `.csv` (header row) or `.jsonl` (one object per line) file
#[derive(Debug, Clone)]
pub struct FileWorkSource {
    path: PathBuf,
    id_field: String,
}

impl FileWorkSource {
    pub fn new(path: impl AsRef<Path>, id_field: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            id_field: id_field.into(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.path, config.id_field.as_str())
    }

    fn parse(&self, content: &str) -> Result<Vec<WorkItem<FacilityPayload>>, SourceError> {
        let extension = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("csv") => parse_csv(content, &self.id_field),
            Some("jsonl") | Some("ndjson") => parse_jsonl(content, &self.id_field),
            _ => Err(SourceError::UnsupportedFormat(
                self.path.display().to_string(),
            )),
        }
    }
}

impl WorkSource<FacilityPayload> for FileWorkSource {
    async fn load(&self) -> Result<Vec<WorkItem<FacilityPayload>>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let items = self.parse(&content)?;
        tracing::info!(
            "Loaded {} work items from {}",
            items.len(),
            self.path.display()
        );
        Ok(items)
    }
}

fn parse_csv(content: &str, id_field: &str) -> Result<Vec<WorkItem<FacilityPayload>>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let mut items = Vec::new();

    for (index, record) in reader.records().enumerate() {
        let record = record?;
        // header is line 1
        let line = index + 2;

        let payload: FacilityPayload = headers
            .iter()
            .zip(record.iter())
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect();

        let id = payload
            .get(id_field)
            .and_then(id_string)
            .ok_or_else(|| SourceError::MissingId {
                line,
                field: id_field.to_string(),
            })?;

        items.push(WorkItem::new(id, payload));
    }

    Ok(items)
}

fn parse_jsonl(content: &str, id_field: &str) -> Result<Vec<WorkItem<FacilityPayload>>, SourceError> {
    let mut items = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let payload: FacilityPayload =
            serde_json::from_str(raw).map_err(|e| SourceError::Parse {
                line,
                message: e.to_string(),
            })?;

        let id = payload
            .get(id_field)
            .and_then(id_string)
            .ok_or_else(|| SourceError::MissingId {
                line,
                field: id_field.to_string(),
            })?;

        items.push(WorkItem::new(id, payload));
    }

    Ok(items)
}

/// IDs may be strings or numbers in the work list
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
