use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;

/// Loads and parses a configuration file from the given path
///
/// `HARVEST_*` environment variables override values from the file.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, override, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, |var| std::env::var(var).ok())
}

/// Parses configuration text, applies overrides from `lookup`, and validates the result
///
/// `lookup` resolves an environment variable name to its value; tests pass a closure
/// over a fixed map instead of touching the process environment.
pub fn parse_config<F>(content: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content)?;
    apply_env_overrides(&mut config, lookup)?;
    validate(&config)?;
    Ok(config)
}

/// Applies `HARVEST_*` overrides to a parsed configuration
///
/// Unset variables leave the file's value in place. A set but unparsable value is an
/// error rather than being ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = parse_var(&lookup, "HARVEST_CONCURRENCY")? {
        config.pipeline.concurrency = value;
    }
    if let Some(value) = parse_var(&lookup, "HARVEST_MAX_ATTEMPTS")? {
        config.retry.max_attempts = value;
    }
    if let Some(value) = parse_var(&lookup, "HARVEST_BASE_DELAY_MS")? {
        config.retry.base_delay_ms = value;
    }
    if let Some(value) = parse_var(&lookup, "HARVEST_MAX_DELAY_MS")? {
        config.retry.max_delay_ms = value;
    }
    if let Some(value) = bool_var(&lookup, "HARVEST_SKIP_COMPLETED")? {
        config.pipeline.skip_completed = value;
    }
    if let Some(value) = bool_var(&lookup, "HARVEST_RETRY_FAILED")? {
        config.pipeline.retry_failed = value;
    }
    if let Some(value) = lookup("HARVEST_CHECKPOINT_PATH") {
        config.checkpoint.path = value;
    }
    if let Some(value) = lookup("HARVEST_OUTPUT_PATH") {
        config.output.path = value;
    }
    Ok(())
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidOverride {
                var: var.to_string(),
                value: raw,
            }),
    }
}

fn bool_var<F>(lookup: &F, var: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidOverride {
            var: var.to_string(),
            value: raw,
        }),
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is recorded per run so a resumed run can be compared against the one that
/// wrote the checkpoint.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(hash_content(&content))
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loads a configuration and returns both the config and its hash
///
/// The file is read once, so the hash always describes the content that was parsed.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content, |var| std::env::var(var).ok())?;
    Ok((config, hash_content(&content)))
}
