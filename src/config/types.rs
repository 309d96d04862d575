use serde::Deserialize;

/// Main configuration structure for Facility-Harvest
///
/// Every section is optional; a minimal file only needs `[source]` and `[harvest]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub checkpoint: CheckpointConfig,
    pub output: OutputConfig,
    pub source: SourceConfig,
    pub http: HttpConfig,
    pub harvest: HarvestConfig,
}

/// Scheduler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of items processed at once
    pub concurrency: usize,

    /// Skip items the checkpoint already shows as completed (false means a fresh run)
    #[serde(rename = "skip-completed")]
    pub skip_completed: bool,

    /// Process items a previous run recorded as failed
    #[serde(rename = "retry-failed")]
    pub retry_failed: bool,

    /// Write an `in_progress` record when an item is picked up
    #[serde(rename = "record-in-progress")]
    pub record_in_progress: bool,

    /// Log a progress line every this many finished items
    #[serde(rename = "progress-every")]
    pub progress_every: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            skip_completed: true,
            retry_failed: true,
            record_in_progress: true,
            progress_every: 10,
        }
    }
}

/// Retry and backoff configuration for network operations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff delay (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Timeout for one attempt (milliseconds, 0 disables)
    #[serde(rename = "attempt-timeout-ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            attempt_timeout_ms: 30_000,
        }
    }
}

/// Which checkpoint backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Log,
    Sqlite,
}

/// Checkpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub backend: CheckpointBackend,

    /// Path to the checkpoint log or database
    pub path: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Log,
            path: "./harvest-progress.log".to_string(),
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "csv")]
    Csv,

    /// One JSON document per item in a directory
    #[serde(rename = "json-files")]
    JsonFiles,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,

    /// CSV file path, or directory for `json-files`
    pub path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Csv,
            path: "./facilities.csv".to_string(),
        }
    }
}

/// Work list configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Path to a `.csv` or `.jsonl` work list
    pub path: String,

    /// Column or key holding each item's ID
    #[serde(rename = "id-field")]
    pub id_field: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: "./facilities.jsonl".to_string(),
            id_field: "id".to_string(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Request-level timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,

    #[serde(rename = "https-only")]
    pub https_only: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("facility-harvest/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            https_only: false,
        }
    }
}

/// Detail page scraping configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Detail page URL with an `{id}` placeholder
    #[serde(rename = "url-template")]
    pub url_template: Option<String>,

    /// Payload field holding the detail page URL (used when no template is set)
    #[serde(rename = "url-field")]
    pub url_field: Option<String>,

    /// Fields extracted from the detail page, in column order
    #[serde(rename = "field")]
    pub fields: Vec<FieldConfig>,

    /// Inspection report links to download
    pub reports: Option<ReportsConfig>,
}

/// One extracted column
#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    /// Column name
    pub name: String,

    /// CSS selector; the first match is used
    pub selector: String,

    /// Attribute to read instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,

    /// Fail the item when nothing matches
    #[serde(default)]
    pub required: bool,
}

/// Report download configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReportsConfig {
    /// CSS selector matching report links
    pub selector: String,

    /// Attribute holding the link target
    #[serde(default = "default_link_attribute")]
    pub attribute: String,

    /// Directory reports are saved under, one subdirectory per item
    pub directory: String,

    /// Fail the item when any report download fails
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_link_attribute() -> String {
    "href".to_string()
}

fn default_true() -> bool {
    true
}
