//! id-sweep: a circuit-breaking crawler for ID-indexed resources
//!
//! This crate walks a dense range of positive integer IDs against an external
//! resource, persisting every record it finds and every ID that is permanently
//! absent. Runs are rate limited, skip IDs that were already resolved, can be
//! cancelled from outside, and halt (rolling back their last absence markers)
//! once a long streak of "not found" responses signals the end of the data.

pub mod config;
pub mod crawler;
pub mod output;
pub mod record;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for id-sweep operations
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid crawl configuration: {0}")]
    InvalidConfiguration(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Record error: {0}")]
    Record(#[from] record::RecordError),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Job {0} is already being awaited")]
    AlreadyAwaited(i64),

    #[error("Crawl task for job {job_id} failed: {message}")]
    TaskFailed { job_id: i64, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid crawl mode '{0}' (expected 'fresh' or 'missing')")]
    InvalidMode(String),

    #[error("No API token configured: set api-token or the {0} environment variable")]
    MissingToken(String),
}

/// Result type alias for id-sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlEngine, CrawlSummary, JobHandle, JobRegistry, StartCrawl};
pub use state::{CrawlJob, CrawlMode, CrawlState};
pub use storage::{SqliteStorage, Storage};
