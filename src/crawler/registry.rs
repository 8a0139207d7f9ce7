//! Job registry - the control surface for crawl runs
//!
//! Each started job runs as its own tokio task. The registry keeps the task
//! handle and the run-local cancellation token per job ID, so callers can
//! cancel, query or await any job it started. Status queries and
//! cancellation also work for jobs started by another process, through the
//! persisted job record.
//!
//! A job stays registered until it is awaited or pruned. Its token stays
//! reachable while a caller is waiting on it, so `cancel` and `cancel_all`
//! still reach the run.

use crate::config::CrawlerConfig;
use crate::crawler::engine::{CrawlEngine, CrawlSummary};
use crate::crawler::fetcher::FetchClient;
use crate::state::{CrawlJob, CrawlMode, CrawlState};
use crate::storage::{with_storage, SharedStorage, Storage, StorageError};
use crate::SweepError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Parameters of a crawl request
#[derive(Debug, Clone, PartialEq)]
pub struct StartCrawl {
    /// `"fresh"` or `"missing"`
    pub mode: String,
    pub start_id: i64,
    pub end_id: i64,
    pub max_requests_per_second: u32,
}

/// Returned when a job has been started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: i64,
    pub items_scraped: u64,
}

/// Whether a job's task is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Finished(CrawlState),
}

struct RegisteredJob {
    token: CancellationToken,

    /// Taken by the caller awaiting the job
    handle: Option<JoinHandle<CrawlSummary>>,
}

pub struct JobRegistry<S> {
    storage: SharedStorage<S>,
    fetcher: FetchClient,
    defaults: CrawlerConfig,
    jobs: Mutex<HashMap<i64, RegisteredJob>>,
}

impl<S> JobRegistry<S>
where
    S: Storage + Send + 'static,
{
    /// Creates a registry
    ///
    /// `defaults` supplies every run setting a [`StartCrawl`] does not carry
    /// (threshold, refresh interval, backoff, scheduling).
    pub fn new(storage: SharedStorage<S>, fetcher: FetchClient, defaults: CrawlerConfig) -> Self {
        Self {
            storage,
            fetcher,
            defaults,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &SharedStorage<S> {
        &self.storage
    }

    fn jobs(&self) -> Result<MutexGuard<'_, HashMap<i64, RegisteredJob>>, SweepError> {
        self.jobs
            .lock()
            .map_err(|_| SweepError::Storage(StorageError::LockPoisoned))
    }

    /// Validates the request, creates the job and spawns its run
    ///
    /// Must be called from within a tokio runtime. Returns as soon as the run
    /// task is spawned.
    pub fn start_crawl(&self, request: StartCrawl) -> Result<JobHandle, SweepError> {
        let mode: CrawlMode = request
            .mode
            .parse()
            .map_err(|e: crate::ConfigError| SweepError::InvalidConfiguration(e.to_string()))?;

        let config = CrawlerConfig {
            start_id: request.start_id,
            end_id: request.end_id,
            max_requests_per_second: request.max_requests_per_second,
            mode,
            ..self.defaults.clone()
        };

        let token = CancellationToken::new();
        let engine = CrawlEngine::new(
            config,
            self.storage.clone(),
            self.fetcher.clone(),
            token.clone(),
        )?;
        let job_id = engine.job_id();
        let handle = tokio::spawn(engine.run());

        self.jobs()?.insert(
            job_id,
            RegisteredJob {
                token,
                handle: Some(handle),
            },
        );
        tracing::info!("Started job {}", job_id);

        Ok(JobHandle {
            job_id,
            items_scraped: 0,
        })
    }

    /// Requests cancellation of a job
    ///
    /// Sets the persisted flag and, for jobs running in this process, the
    /// run-local token. The run stops at its next cancellation check.
    pub fn cancel(&self, job_id: i64) -> Result<(), SweepError> {
        if let Some(job) = self.jobs()?.get(&job_id) {
            job.token.cancel();
        }

        with_storage(&self.storage, |s| s.set_cancelled(job_id)).map_err(not_found_as_job)?;
        tracing::info!("Cancellation requested for job {}", job_id);
        Ok(())
    }

    /// Reads the persisted snapshot of a job
    pub fn job_status(&self, job_id: i64) -> Result<CrawlJob, SweepError> {
        with_storage(&self.storage, |s| s.get_job(job_id)).map_err(not_found_as_job)
    }

    /// Reports whether a job is still running
    pub fn task_status(&self, job_id: i64) -> Result<TaskStatus, SweepError> {
        let task_finished = self
            .jobs()?
            .get(&job_id)
            .map(|job| job.handle.as_ref().is_some_and(|h| h.is_finished()));
        let job = self.job_status(job_id)?;

        Ok(match (task_finished, job.state.is_terminal()) {
            (_, true) => TaskStatus::Finished(job.state),
            (Some(true), false) => TaskStatus::Finished(CrawlState::Failed),
            _ => TaskStatus::Running,
        })
    }

    /// Waits for a job started by this registry to finish
    ///
    /// The job stays cancellable while awaited and leaves the registry once
    /// its task has returned; its persisted record stays. A run task that
    /// panicked is recorded as `Failed`.
    ///
    /// # Errors
    ///
    /// * `SweepError::JobNotFound` - the job is not registered here
    /// * `SweepError::AlreadyAwaited` - another caller is waiting on the job
    /// * `SweepError::TaskFailed` - the run task panicked
    pub async fn wait(&self, job_id: i64) -> Result<CrawlSummary, SweepError> {
        let handle = self
            .jobs()?
            .get_mut(&job_id)
            .ok_or(SweepError::JobNotFound(job_id))?
            .handle
            .take()
            .ok_or(SweepError::AlreadyAwaited(job_id))?;

        let result = self.join(job_id, handle).await;
        if let Ok(mut jobs) = self.jobs() {
            jobs.remove(&job_id);
        }
        result
    }

    async fn join(
        &self,
        job_id: i64,
        handle: JoinHandle<CrawlSummary>,
    ) -> Result<CrawlSummary, SweepError> {
        match handle.await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                tracing::error!("Crawl task for job {} failed: {}", job_id, e);
                if let Err(store_err) = with_storage(&self.storage, |s| {
                    let snapshot = s.get_job(job_id)?;
                    s.finish_job(job_id, CrawlState::Failed, &snapshot.stats)
                }) {
                    tracing::error!("Failed to mark job {} failed: {}", job_id, store_err);
                }
                Err(SweepError::TaskFailed {
                    job_id,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Drops finished jobs that nobody is awaiting and returns how many
    ///
    /// Their persisted records stay queryable through [`Self::job_status`].
    pub async fn prune_finished(&self) -> Result<usize, SweepError> {
        let finished: Vec<(i64, JoinHandle<CrawlSummary>)> = {
            let mut jobs = self.jobs()?;
            let ids: Vec<i64> = jobs
                .iter()
                .filter(|(_, job)| job.handle.as_ref().is_some_and(|h| h.is_finished()))
                .map(|(&job_id, _)| job_id)
                .collect();
            ids.into_iter()
                .filter_map(|job_id| {
                    let handle = jobs.remove(&job_id)?.handle?;
                    Some((job_id, handle))
                })
                .collect()
        };

        let pruned = finished.len();
        for (job_id, handle) in finished {
            // Failures are already logged and persisted by join
            let _ = self.join(job_id, handle).await;
        }
        if pruned > 0 {
            tracing::debug!("Pruned {} finished jobs", pruned);
        }
        Ok(pruned)
    }

    /// Cancels every job this registry is still tracking
    ///
    /// All run-local tokens are cancelled before any flag is persisted, so a
    /// storage failure cannot leave a local run going. Returns how many jobs
    /// were signalled, or the first storage error.
    pub fn cancel_all(&self) -> Result<usize, SweepError> {
        let ids: Vec<i64> = {
            let jobs = self.jobs()?;
            for job in jobs.values() {
                job.token.cancel();
            }
            jobs.keys().copied().collect()
        };

        let mut first_error = None;
        for &job_id in &ids {
            if let Err(e) = with_storage(&self.storage, |s| s.set_cancelled(job_id)) {
                tracing::error!("Failed to persist cancellation of job {}: {}", job_id, e);
                first_error.get_or_insert(not_found_as_job(e));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("Cancellation requested for {} jobs", ids.len());
                Ok(ids.len())
            }
        }
    }
}

fn not_found_as_job(e: StorageError) -> SweepError {
    match e {
        StorageError::JobNotFound(job_id) => SweepError::JobNotFound(job_id),
        other => SweepError::Storage(other),
    }
}
