use crate::config::types::{ApiConfig, Config, CrawlerConfig, OutputConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_api_config(&config.api)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the parameters of a crawl run
///
/// Also used by the job registry, so a start request with a bad range or rate
/// fails before any job record exists.
pub fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.start_id < 1 {
        return Err(ConfigError::Validation(format!(
            "start_id must be >= 1, got {}",
            config.start_id
        )));
    }

    if config.end_id < config.start_id {
        return Err(ConfigError::Validation(format!(
            "end_id ({}) must be >= start_id ({})",
            config.end_id, config.start_id
        )));
    }

    if config.max_requests_per_second < 1 {
        return Err(ConfigError::Validation(format!(
            "max_requests_per_second must be >= 1, got {}",
            config.max_requests_per_second
        )));
    }

    if config.consecutive_invalid_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "consecutive_invalid_threshold must be >= 1, got {}",
            config.consecutive_invalid_threshold
        )));
    }

    if config.refresh_interval < 1 {
        return Err(ConfigError::Validation(format!(
            "refresh_interval must be >= 1, got {}",
            config.refresh_interval
        )));
    }

    Ok(())
}

/// Validates external resource configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.query_free_base().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must not carry a query string or fragment: '{}'",
            config.base_url
        )));
    }

    if config.token_env.is_empty() && config.api_token.is_none() {
        return Err(ConfigError::Validation(
            "token_env cannot be empty when no api_token is given".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "request_timeout_secs must be >= 1, got {}",
            config.request_timeout_secs
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

impl ApiConfig {
    /// Base URL without a trailing slash, or None if it has a query or fragment
    pub(crate) fn query_free_base(&self) -> Option<&str> {
        if self.base_url.contains('?') || self.base_url.contains('#') {
            return None;
        }
        Some(self.base_url.trim_end_matches('/'))
    }
}
