//! Crawl engine - the run state machine
//!
//! This module walks one ID range from start to end, coordinating:
//! - The exclusion snapshot (IDs already resolved)
//! - Rate limiting and throttle-aware fetching
//! - Persisting records and absence markers
//! - The circuit breaker and its marker rollback
//! - Cooperative cancellation
//!
//! Persistence failures never stop a run; they are logged and the walk
//! moves on to the next ID.

use crate::config::{validate_crawler_config, CrawlerConfig, Scheduling};
use crate::crawler::breaker::CircuitBreaker;
use crate::crawler::cancel::RunCancellation;
use crate::crawler::exclusion::ExclusionTracker;
use crate::crawler::fetcher::{fetch_with_retry, FetchClient, FetchReport, Outcome};
use crate::crawler::rate_limiter::RateLimiter;
use crate::record::RecordFields;
use crate::state::{CrawlState, JobStats, NewJob};
use crate::storage::{with_storage, SharedStorage, Storage, UpsertOutcome};
use crate::SweepError;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Final account of a run
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlSummary {
    pub job_id: i64,
    pub state: CrawlState,
    pub stats: JobStats,

    /// IDs that were fetched
    pub processed: u64,

    /// IDs skipped because they were in the exclusion set
    pub skipped: u64,

    pub elapsed: Duration,
    pub requests_per_second: f64,
}

/// Executes a single crawl job
pub struct CrawlEngine<S> {
    job_id: i64,
    config: CrawlerConfig,
    storage: SharedStorage<S>,
    fetcher: FetchClient,
    cancellation: RunCancellation,
    limiter: RateLimiter,
    tracker: ExclusionTracker,
    breaker: CircuitBreaker,
    stats: JobStats,
    processed: u64,
    skipped: u64,
}

impl<S> CrawlEngine<S>
where
    S: Storage + Send + 'static,
{
    /// Validates the configuration and creates the job record
    ///
    /// Nothing is persisted when the configuration is invalid.
    ///
    /// # Errors
    ///
    /// * `SweepError::InvalidConfiguration` - bad range, rate or threshold
    /// * `SweepError::Storage` - the job record could not be created
    pub fn new(
        config: CrawlerConfig,
        storage: SharedStorage<S>,
        fetcher: FetchClient,
        token: CancellationToken,
    ) -> Result<Self, SweepError> {
        validate_crawler_config(&config)
            .map_err(|e| SweepError::InvalidConfiguration(e.to_string()))?;

        let new_job = NewJob {
            start_id: config.start_id,
            end_id: config.end_id,
            max_requests_per_second: config.max_requests_per_second,
            mode: config.mode,
            consecutive_invalid_threshold: config.consecutive_invalid_threshold,
        };
        let job_id = with_storage(&storage, |s| s.create_job(&new_job))?;

        tracing::info!(
            "Created job {}: IDs {}..={} in {} mode, {} req/s, threshold {}",
            job_id,
            config.start_id,
            config.end_id,
            config.mode,
            config.max_requests_per_second,
            config.consecutive_invalid_threshold
        );

        Ok(Self {
            job_id,
            limiter: RateLimiter::new(config.max_requests_per_second),
            tracker: ExclusionTracker::new(config.mode),
            breaker: CircuitBreaker::new(
                config.consecutive_invalid_threshold,
                config.reset_on_transient_error,
            ),
            cancellation: RunCancellation::new(token, job_id),
            config,
            storage,
            fetcher,
            stats: JobStats::default(),
            processed: 0,
            skipped: 0,
        })
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    /// Runs the job to a terminal state
    ///
    /// Final stats, the terminal state and the finish time are persisted on
    /// every exit path.
    pub async fn run(mut self) -> CrawlSummary {
        let started = Instant::now();

        if let Err(e) = with_storage(&self.storage, |s| {
            s.update_job_state(self.job_id, CrawlState::Running)
        }) {
            tracing::error!("Failed to mark job {} running: {}", self.job_id, e);
        }
        self.refresh_exclusions();

        tracing::info!(
            "Job {} running ({:?} scheduling, {} IDs excluded)",
            self.job_id,
            self.config.scheduling,
            self.tracker.len()
        );

        let state = match self.config.scheduling {
            Scheduling::Sequential => self.run_sequential().await,
            Scheduling::Concurrent => self.run_concurrent().await,
        };

        self.finish(state, started.elapsed())
    }

    async fn run_sequential(&mut self) -> CrawlState {
        let backoff = self.config.throttle_backoff();
        let mut iteration: u64 = 0;

        for id in self.config.start_id..=self.config.end_id {
            self.tick(iteration);
            iteration += 1;

            if self.tracker.contains(id) {
                tracing::debug!("Skipping excluded ID {}", id);
                self.skipped += 1;
                continue;
            }

            if self.cancellation.is_cancelled(&*self.storage) {
                tracing::info!("Job {} cancelled before ID {}", self.job_id, id);
                return CrawlState::Cancelled;
            }

            self.limiter.gate(self.processed).await;
            let report = fetch_with_retry(&self.fetcher, id, backoff).await;
            self.apply(report);

            if self.breaker.is_tripped() {
                self.roll_back();
                return CrawlState::CircuitTripped;
            }
        }

        CrawlState::Completed
    }

    async fn run_concurrent(&mut self) -> CrawlState {
        let backoff = self.config.throttle_backoff();
        let batch_size = self.config.max_requests_per_second.max(1) as usize;
        let mut ids = self.config.start_id..=self.config.end_id;
        let mut iteration: u64 = 0;

        loop {
            let mut batch = Vec::with_capacity(batch_size);
            while batch.len() < batch_size {
                let Some(id) = ids.next() else { break };
                self.tick(iteration);
                iteration += 1;

                if self.tracker.contains(id) {
                    tracing::debug!("Skipping excluded ID {}", id);
                    self.skipped += 1;
                } else {
                    batch.push(id);
                }
            }

            if batch.is_empty() {
                return CrawlState::Completed;
            }

            if self.cancellation.is_cancelled(&*self.storage) {
                tracing::info!(
                    "Job {} cancelled before batch starting at ID {}",
                    self.job_id,
                    batch[0]
                );
                return CrawlState::Cancelled;
            }

            self.limiter.gate(self.processed).await;

            let handles: Vec<(i64, JoinHandle<FetchReport>)> = batch
                .iter()
                .map(|&id| {
                    let fetcher = self.fetcher.clone();
                    let handle =
                        tokio::spawn(async move { fetch_with_retry(&fetcher, id, backoff).await });
                    (id, handle)
                })
                .collect();

            let mut reports = Vec::with_capacity(handles.len());
            for (id, handle) in handles {
                match handle.await {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        tracing::error!("Fetch task for ID {} failed: {}", id, e);
                        reports.push(FetchReport::lost(id, e.to_string()));
                    }
                }
            }

            reports.sort_by_key(|report| report.id);
            for report in reports {
                self.apply(report);
            }

            if self.breaker.is_tripped() {
                self.roll_back();
                return CrawlState::CircuitTripped;
            }
        }
    }

    /// Periodic maintenance at the start of an iteration
    fn tick(&mut self, iteration: u64) {
        if iteration == 0 || iteration % self.config.refresh_interval.max(1) != 0 {
            return;
        }

        self.refresh_exclusions();
        if let Err(e) = with_storage(&self.storage, |s| {
            s.write_job_stats(self.job_id, &self.stats)
        }) {
            tracing::error!("Failed to persist stats for job {}: {}", self.job_id, e);
        }

        tracing::info!(
            "Job {} progress: {} processed, {} skipped, {} stored, {} requests",
            self.job_id,
            self.processed,
            self.skipped,
            self.stats.items_scraped,
            self.stats.total_requests
        );
    }

    fn refresh_exclusions(&mut self) {
        if let Err(e) = self.tracker.refresh(&*self.storage) {
            tracing::warn!(
                "Failed to refresh exclusion set, keeping {} known IDs: {}",
                self.tracker.len(),
                e
            );
        }
    }

    /// Folds one fetch report into the run
    fn apply(&mut self, report: FetchReport) {
        self.processed += 1;
        self.stats.total_requests += report.attempts;
        self.stats.total_request_time += report.request_time;

        let id = report.id;
        match &report.outcome {
            Outcome::Success(payload) => self.persist_record(id, payload),
            Outcome::Absent => {
                tracing::warn!("ID {} not found", id);
                if let Err(e) = with_storage(&self.storage, |s| s.mark_absent(id, self.job_id)) {
                    tracing::error!("Failed to record absent ID {}: {}", id, e);
                }
            }
            failure => tracing::error!("Failed to fetch ID {}: {}", id, failure),
        }

        self.breaker.record(id, &report.outcome);
        self.stats.consecutive_invalid = self.breaker.consecutive_invalid();
    }

    fn persist_record(&mut self, id: i64, payload: &Value) {
        let record = match RecordFields::from_payload(id, payload) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Rejected payload for ID {}: {}", id, e);
                return;
            }
        };

        match with_storage(&self.storage, |s| s.upsert_record(&record)) {
            Ok(outcome) => {
                self.stats.items_scraped += 1;
                match outcome {
                    UpsertOutcome::Inserted => tracing::debug!("Stored new record {}", id),
                    UpsertOutcome::Updated => tracing::debug!("Updated record {}", id),
                }
            }
            Err(e) => tracing::error!("Failed to store record {}: {}", id, e),
        }
    }

    /// Deletes the absence markers of the current streak
    fn roll_back(&mut self) {
        let streak = self.breaker.consecutive_invalid();
        let ids = self.breaker.trip();
        self.stats.consecutive_invalid = 0;

        tracing::warn!(
            "Job {}: {} consecutive IDs not found, stopping and rolling back {} absence markers",
            self.job_id,
            streak,
            ids.len()
        );

        for id in ids {
            if let Err(e) = with_storage(&self.storage, |s| s.delete_absent(id)) {
                tracing::error!("Failed to roll back absence marker {}: {}", id, e);
            }
        }
    }

    fn finish(self, state: CrawlState, elapsed: Duration) -> CrawlSummary {
        if let Err(e) = with_storage(&self.storage, |s| {
            s.finish_job(self.job_id, state, &self.stats)
        }) {
            tracing::error!("Failed to persist final state of job {}: {}", self.job_id, e);
        }

        let secs = elapsed.as_secs_f64();
        let requests_per_second = if secs > 0.0 {
            self.stats.total_requests as f64 / secs
        } else {
            0.0
        };

        tracing::info!(
            "Job {} finished as {}: {} requests in {:.2?} ({:.2} req/s, avg {:.2?}/request), {} processed, {} skipped, {} stored",
            self.job_id,
            state,
            self.stats.total_requests,
            elapsed,
            requests_per_second,
            self.stats.average_request_time(),
            self.processed,
            self.skipped,
            self.stats.items_scraped
        );

        CrawlSummary {
            job_id: self.job_id,
            state,
            stats: self.stats,
            processed: self.processed,
            skipped: self.skipped,
            elapsed,
            requests_per_second,
        }
    }
}
