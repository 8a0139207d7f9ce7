//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! database statistics, job snapshots and run summaries.

use crate::crawler::CrawlSummary;
use crate::state::{CrawlJob, CrawlState};
use crate::storage::Storage;
use crate::SweepError;
use std::collections::HashMap;

/// Database statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Number of stored records
    pub total_records: u64,

    /// Number of IDs marked absent
    pub absent_ids: u64,

    /// All jobs, newest first
    pub jobs: Vec<CrawlJob>,

    /// Count of jobs by lifecycle state
    pub jobs_by_state: HashMap<CrawlState, u64>,
}

impl CrawlStatistics {
    /// IDs resolved either way
    pub fn resolved_ids(&self) -> u64 {
        self.total_records + self.absent_ids
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(SweepError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics, SweepError> {
    let total_records = storage.count_records()?;
    let absent_ids = storage.count_absent()?;
    let jobs = storage.list_jobs()?;

    let mut jobs_by_state = HashMap::new();
    for job in &jobs {
        *jobs_by_state.entry(job.state).or_insert(0) += 1;
    }

    Ok(CrawlStatistics {
        total_records,
        absent_ids,
        jobs,
        jobs_by_state,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Stored records: {}", stats.total_records);
    println!("  Absent IDs: {}", stats.absent_ids);
    println!("  Resolved IDs: {}", stats.resolved_ids());
    println!();

    println!("Jobs by State:");
    let mut state_counts: Vec<_> = stats.jobs_by_state.iter().collect();
    state_counts.sort_by(|a, b| b.1.cmp(a.1));
    for (state, count) in state_counts {
        println!("  {}: {}", state, count);
    }
    println!();

    if let Some(latest) = stats.jobs.first() {
        println!("Latest Job:");
        print_job(latest);
    } else {
        println!("No jobs recorded yet");
    }
}

/// Prints a persisted job snapshot
pub fn print_job(job: &CrawlJob) {
    println!("  Job ID: {}", job.job_id);
    println!("  State: {}", job.state);
    println!("  Mode: {}", job.mode);
    println!("  Range: {}..={}", job.start_id, job.end_id);
    println!("  Max requests/second: {}", job.max_requests_per_second);
    println!(
        "  Consecutive invalid: {} / {}",
        job.stats.consecutive_invalid, job.consecutive_invalid_threshold
    );
    println!("  Total requests: {}", job.stats.total_requests);
    println!(
        "  Average request time: {:.2?}",
        job.stats.average_request_time()
    );
    println!("  Items scraped: {}", job.stats.items_scraped);
    println!("  Cancel requested: {}", job.cancelled);
    println!("  Started: {}", job.started_at);
    if let Some(finished_at) = &job.finished_at {
        println!("  Finished: {}", finished_at);
    }
}

/// Prints the summary of a finished run
pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Job {} finished: {} ===\n", summary.job_id, summary.state);
    println!("  IDs processed: {}", summary.processed);
    println!("  IDs skipped: {}", summary.skipped);
    println!("  Items scraped: {}", summary.stats.items_scraped);
    println!("  Total requests: {}", summary.stats.total_requests);
    println!("  Elapsed: {:.2?}", summary.elapsed);
    println!("  Requests/second: {:.2}", summary.requests_per_second);
    println!(
        "  Average request time: {:.2?}",
        summary.stats.average_request_time()
    );
}
