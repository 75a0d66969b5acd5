use crate::config::types::{
    Config, MediaConfig, OrchestratorConfig, OutputConfig, SourceConfig, UserAgentConfig,
};
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_orchestrator_config(&config.orchestrator)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_media_config(&config.media)?;
    validate_sources(&config.sources)?;
    Ok(())
}

fn validate_orchestrator_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    if config.max_advance_attempts < 1 || config.max_advance_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max_advance_attempts must be between 1 and 20, got {}",
            config.max_advance_attempts
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "request_timeout_secs must be >= 1, got {}",
            config.request_timeout_secs
        )));
    }

    if config.flush_every < 1 || config.flush_every > 100 {
        return Err(ConfigError::Validation(format!(
            "flush_every must be between 1 and 100, got {}",
            config.flush_every
        )));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("ledger_path", &config.ledger_path),
        ("records_path", &config.records_path),
        ("images_dir", &config.images_dir),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    if config.ledger_path == config.records_path {
        return Err(ConfigError::Validation(
            "ledger_path and records_path must point to different files".to_string(),
        ));
    }

    Ok(())
}

fn validate_media_config(config: &MediaConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_downloads < 1 || config.max_concurrent_downloads > 64 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_downloads must be between 1 and 64, got {}",
            config.max_concurrent_downloads
        )));
    }
    Ok(())
}

fn validate_sources(sources: &[SourceConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for source in sources {
        validate_source_name(&source.name)?;

        if !seen.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Source name '{}' is configured more than once",
                source.name
            )));
        }

        let url = Url::parse(&source.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid URL for source '{}': {}", source.name, e))
        })?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::Validation(format!(
                "Source URL '{}' must use http or https",
                source.url
            )));
        }

        if source.page_param.is_empty() {
            return Err(ConfigError::Validation(format!(
                "page_param for source '{}' cannot be empty",
                source.name
            )));
        }

        validate_selector(&source.item_link_selector)?;
        for selector in source.fields.values() {
            validate_selector(selector)?;
        }
        if let Some(selector) = &source.id_selector {
            validate_selector(selector)?;
        }
        if let Some(selector) = &source.media_selector {
            validate_selector(selector)?;
        }
        if let Some(pattern) = &source.link_pattern {
            compile_link_pattern(pattern)?;
        }

        for required in &source.required_fields {
            if !source.fields.contains_key(required) {
                return Err(ConfigError::Validation(format!(
                    "Required field '{}' of source '{}' has no selector",
                    required, source.name
                )));
            }
        }
    }

    Ok(())
}

/// Compiles a `link-pattern` value
pub fn compile_link_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| {
        ConfigError::Validation(format!("Invalid link-pattern '{}': {}", pattern, e))
    })
}

/// Source names become directory names for media, so keep them plain
fn validate_source_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "Source name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "Source name '{}' must contain only ASCII letters, digits, '-' or '_'",
            name
        )));
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}
