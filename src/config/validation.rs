use crate::config::types::{
    CheckpointConfig, Config, HarvestConfig, OutputConfig, PipelineConfig, RetryConfig,
    SourceConfig,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Column names the detail page processor always emits
const RESERVED_COLUMNS: &[&str] = &["id", "detail_url", "reports"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_pipeline_config(&config.pipeline)?;
    validate_retry_config(&config.retry)?;
    validate_checkpoint_config(&config.checkpoint)?;
    validate_output_config(&config.output)?;
    validate_source_config(&config.source)?;
    validate_harvest_config(&config.harvest)?;
    Ok(())
}

fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.progress_every < 1 {
        return Err(ConfigError::Validation(
            "progress-every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base-delay-ms ({}) must not exceed max-delay-ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

fn validate_checkpoint_config(config: &CheckpointConfig) -> Result<(), ConfigError> {
    if config.path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "output path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    if config.path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "source path cannot be empty".to_string(),
        ));
    }

    if config.id_field.trim().is_empty() {
        return Err(ConfigError::Validation(
            "source id-field cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    match (&config.url_template, &config.url_field) {
        (Some(template), _) => validate_url_template(template)?,
        (None, Some(field)) if !field.trim().is_empty() => {}
        _ => {
            return Err(ConfigError::Validation(
                "harvest needs either url-template or url-field".to_string(),
            ))
        }
    }

    let mut seen = HashSet::new();
    for field in &config.fields {
        if field.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "harvest field name cannot be empty".to_string(),
            ));
        }

        if RESERVED_COLUMNS.contains(&field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "harvest field name '{}' is reserved",
                field.name
            )));
        }

        if !seen.insert(field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate harvest field '{}'",
                field.name
            )));
        }

        validate_selector(&field.selector)?;
    }

    if let Some(reports) = &config.reports {
        validate_selector(&reports.selector)?;

        if reports.directory.trim().is_empty() {
            return Err(ConfigError::Validation(
                "reports directory cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Checks that a template yields an absolute URL once the ID is substituted
fn validate_url_template(template: &str) -> Result<(), ConfigError> {
    if !template.contains("{id}") {
        return Err(ConfigError::InvalidUrl(format!(
            "'{}' has no {{id}} placeholder",
            template
        )));
    }

    Url::parse(&template.replace("{id}", "0"))
        .map_err(|e| ConfigError::InvalidUrl(format!("'{}': {}", template, e)))?;

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}
