//! Network fetching with bounded retry
//!
//! - `RetryingFetcher`: runs one network operation under a `RetryPolicy`
//! - `OperationError` / `FetchError`: per-attempt and final failure classes
//! - HTTP helpers: client builder, status and transport error classification,
//!   page fetch, atomic file download

mod error;
mod http;
mod retry;

pub use error::{FetchError, OperationError};
pub use http::{build_http_client, classify_request_error, classify_status, download_to, fetch_text};
pub use retry::{Retried, RetryAttempt, RetryPolicy, RetryingFetcher};
