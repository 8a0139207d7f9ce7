//! Cooperative run cancellation
//!
//! A run stops when either its in-process token is cancelled or the persisted
//! `cancelled` flag of its job is set, possibly by another process.

use crate::storage::{with_storage, Storage};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RunCancellation {
    local: CancellationToken,
    job_id: i64,
}

impl RunCancellation {
    pub fn new(local: CancellationToken, job_id: i64) -> Self {
        Self { local, job_id }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.local
    }

    /// Checks both cancellation surfaces
    ///
    /// A failed read of the persisted flag counts as "not cancelled".
    pub fn is_cancelled<S: Storage>(&self, storage: &Mutex<S>) -> bool {
        if self.local.is_cancelled() {
            return true;
        }

        match with_storage(storage, |s| s.read_cancelled(self.job_id)) {
            Ok(cancelled) => {
                if cancelled {
                    // Stop the local side as well so later checks skip the read
                    self.local.cancel();
                }
                cancelled
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read cancellation flag for job {}: {}",
                    self.job_id,
                    e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CrawlMode, NewJob};
    use crate::storage::SqliteStorage;

    fn storage_with_job() -> (Mutex<SqliteStorage>, i64) {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let job_id = storage
            .create_job(&NewJob {
                start_id: 1,
                end_id: 10,
                max_requests_per_second: 5,
                mode: CrawlMode::Fresh,
                consecutive_invalid_threshold: 3,
            })
            .unwrap();
        (Mutex::new(storage), job_id)
    }

    #[test]
    fn test_not_cancelled_initially() {
        let (storage, job_id) = storage_with_job();
        let cancellation = RunCancellation::new(CancellationToken::new(), job_id);
        assert!(!cancellation.is_cancelled(&storage));
    }

    #[test]
    fn test_local_token_cancels() {
        let (storage, job_id) = storage_with_job();
        let token = CancellationToken::new();
        let cancellation = RunCancellation::new(token.clone(), job_id);

        token.cancel();
        assert!(cancellation.is_cancelled(&storage));
    }

    #[test]
    fn test_persisted_flag_cancels() {
        let (storage, job_id) = storage_with_job();
        let cancellation = RunCancellation::new(CancellationToken::new(), job_id);

        storage.lock().unwrap().set_cancelled(job_id).unwrap();
        assert!(cancellation.is_cancelled(&storage));
        assert!(cancellation.token().is_cancelled());
    }

    #[test]
    fn test_read_failure_is_not_cancellation() {
        let (storage, _) = storage_with_job();
        let cancellation = RunCancellation::new(CancellationToken::new(), 9999);
        assert!(!cancellation.is_cancelled(&storage));
    }
}
