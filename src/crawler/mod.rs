//! Crawler module for walking an ID range
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with outcome classification and throttle retry
//! - Per-second rate limiting
//! - Exclusion of already resolved IDs
//! - The consecutive "not found" circuit breaker
//! - The run state machine and the job registry

mod breaker;
mod cancel;
mod engine;
mod exclusion;
mod fetcher;
mod rate_limiter;
mod registry;

pub use breaker::CircuitBreaker;
pub use cancel::RunCancellation;
pub use engine::{CrawlEngine, CrawlSummary};
pub use exclusion::ExclusionTracker;
pub use fetcher::{build_http_client, fetch_with_retry, FetchClient, FetchReport, Outcome};
pub use rate_limiter::RateLimiter;
pub use registry::{JobHandle, JobRegistry, StartCrawl, TaskStatus};

use crate::config::Config;
use crate::storage::{open_storage, SharedStorage, SqliteStorage};
use crate::SweepError;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Builds a registry from a loaded configuration
///
/// Opens the configured database and resolves the API token. The crawler
/// section becomes the defaults for every job the registry starts.
pub fn registry_from_config(config: &Config) -> Result<JobRegistry<SqliteStorage>, SweepError> {
    let storage: SharedStorage<SqliteStorage> = Arc::new(Mutex::new(open_storage(Path::new(
        &config.output.database_path,
    ))?));
    let fetcher = FetchClient::new(&config.api)?;

    Ok(JobRegistry::new(storage, fetcher, config.crawler.clone()))
}
