//! HTTP operations wrapped by the retry loop
//!
//! This module handles the network side of harvesting:
//! - Building the shared HTTP client
//! - Classifying status codes and transport errors as transient or permanent
//! - Fetching detail pages as text
//! - Downloading report files atomically

use crate::config::HttpConfig;
use crate::fetch::error::OperationError;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The HTTP configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .https_only(config.https_only)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Classifies a response status
///
/// | Status | Class |
/// |--------|-------|
/// | 2xx | success (`None`) |
/// | 408, 429, 5xx | Transient |
/// | 404, 410 | Permanent (not found) |
/// | other 4xx / 3xx | Permanent |
pub fn classify_status(status: StatusCode, url: &str) -> Option<OperationError> {
    if status.is_success() {
        return None;
    }

    let error = match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            OperationError::transient(format!("HTTP {} from {}", status, url))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            OperationError::permanent(format!("not found: HTTP {} from {}", status, url))
        }
        s if s.is_server_error() => OperationError::transient(format!("HTTP {} from {}", s, url)),
        s => OperationError::permanent(format!("HTTP {} from {}", s, url)),
    };
    Some(error)
}

/// Classifies a transport-level error
pub fn classify_request_error(err: &reqwest::Error) -> OperationError {
    if err.is_timeout() {
        return OperationError::transient(format!("request timeout: {}", err));
    }
    if err.is_connect() {
        return OperationError::transient(format!("connection failed: {}", err));
    }
    if err.is_decode() {
        return OperationError::parse(format!("could not decode response: {}", err));
    }
    if err.is_builder() || err.is_redirect() {
        return OperationError::permanent(err.to_string());
    }
    if let Some(status) = err.status() {
        if let Some(classified) = classify_status(status, err.url().map_or("", |u| u.as_str())) {
            return classified;
        }
    }

    // request and body errors: the connection dropped mid-exchange
    OperationError::transient(err.to_string())
}

/// Fetches a page body as text
///
/// One attempt; wrap in a `RetryingFetcher` to retry.
pub async fn fetch_text(client: &Client, url: &str) -> Result<String, OperationError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_request_error(&e))?;

    if let Some(error) = classify_status(response.status(), url) {
        return Err(error);
    }

    response.text().await.map_err(|e| classify_request_error(&e))
}

/// Downloads a URL to `dest`
///
/// The body is written to a `.part` file beside `dest` and renamed into place, so a
/// crash never leaves a truncated file under the final name.
///
/// # Returns
///
/// * `Ok(u64)` - Number of bytes written
/// * `Err(OperationError)` - The request or the write failed
pub async fn download_to(client: &Client, url: &str, dest: &Path) -> Result<u64, OperationError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_request_error(&e))?;

    if let Some(error) = classify_status(response.status(), url) {
        return Err(error);
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| classify_request_error(&e))?;

    write_atomically(dest, &body)
        .await
        .map_err(|e| OperationError::permanent(format!("writing {}: {}", dest.display(), e)))?;

    Ok(body.len() as u64)
}

async fn write_atomically(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp = part_path(dest);
    tokio::fs::write(&temp, bytes).await?;
    tokio::fs::rename(&temp, dest).await
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
