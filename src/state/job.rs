//! Crawl job record and run mode

use crate::state::CrawlState;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which already-known IDs a run skips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Re-fetch stored records; skip only IDs known to be absent
    Fresh,

    /// Skip both stored records and absent IDs
    Missing,
}

impl CrawlMode {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Missing => "missing",
        }
    }
}

impl FromStr for CrawlMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fresh" => Ok(Self::Fresh),
            "missing" => Ok(Self::Missing),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Progress counters of a run
///
/// Every counter only grows during a run, except `consecutive_invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JobStats {
    /// HTTP requests issued, throttle retries included
    pub total_requests: u64,

    /// Accumulated request latency
    pub total_request_time: Duration,

    /// Records stored during the run
    pub items_scraped: u64,

    /// Current streak of "not found" responses
    pub consecutive_invalid: u32,
}

impl JobStats {
    /// Average latency of a single request
    pub fn average_request_time(&self) -> Duration {
        if self.total_requests == 0 {
            Duration::ZERO
        } else {
            self.total_request_time
                .div_f64(self.total_requests as f64)
        }
    }
}

/// Parameters of a job at creation time
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub start_id: i64,
    pub end_id: i64,
    pub max_requests_per_second: u32,
    pub mode: CrawlMode,
    pub consecutive_invalid_threshold: u32,
}

/// Persisted snapshot of a crawl job
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlJob {
    pub job_id: i64,
    pub start_id: i64,
    pub end_id: i64,
    pub max_requests_per_second: u32,
    pub mode: CrawlMode,
    pub consecutive_invalid_threshold: u32,
    pub stats: JobStats,
    pub cancelled: bool,
    pub state: CrawlState,
    pub started_at: String,
    pub finished_at: Option<String>,
}
