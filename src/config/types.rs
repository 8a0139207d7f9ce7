use crate::state::CrawlMode;
use crate::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for id-sweep
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub api: ApiConfig,
    pub output: OutputConfig,
}

/// How fetches are scheduled within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// One fetch at a time; throttle retries block the run
    #[default]
    Sequential,

    /// Batches of up to `max-requests-per-second` concurrent fetches per window
    Concurrent,
}

/// Crawl run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// First ID of the scan range (inclusive)
    #[serde(rename = "start-id")]
    pub start_id: i64,

    /// Last ID of the scan range (inclusive)
    #[serde(rename = "end-id")]
    pub end_id: i64,

    /// Maximum number of fetches initiated per one-second window
    #[serde(rename = "max-requests-per-second")]
    pub max_requests_per_second: u32,

    /// Which IDs are excluded from the run
    pub mode: CrawlMode,

    /// Number of consecutive "not found" responses that ends a run
    #[serde(rename = "consecutive-invalid-threshold")]
    pub consecutive_invalid_threshold: u32,

    /// Iterations between exclusion-set refreshes and job stat flushes
    #[serde(rename = "refresh-interval", default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Pause before retrying a throttled ID (milliseconds)
    #[serde(rename = "throttle-backoff-ms", default = "default_throttle_backoff_ms")]
    pub throttle_backoff_ms: u64,

    #[serde(default)]
    pub scheduling: Scheduling,

    /// Whether a transient error resets the consecutive "not found" streak
    #[serde(
        rename = "reset-on-transient-error",
        default = "default_reset_on_transient_error"
    )]
    pub reset_on_transient_error: bool,
}

impl CrawlerConfig {
    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_millis(self.throttle_backoff_ms)
    }
}

/// External resource configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL; records are fetched from `<base-url>/<id>`
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Optional `language` query parameter sent with every request
    #[serde(default)]
    pub language: Option<String>,

    /// Environment variable holding the bearer token
    #[serde(rename = "token-env", default = "default_token_env")]
    pub token_env: String,

    /// Bearer token given inline; takes precedence over `token-env`
    #[serde(rename = "api-token", default)]
    pub api_token: Option<String>,

    /// Transport-level timeout for a single request (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    /// Resolves the bearer token from the inline value or the environment
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = self.api_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }

        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingToken(self.token_env.clone()))
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_refresh_interval() -> u64 {
    100
}

fn default_throttle_backoff_ms() -> u64 {
    30_000
}

fn default_reset_on_transient_error() -> bool {
    true
}

fn default_token_env() -> String {
    "API_TOKEN".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}
