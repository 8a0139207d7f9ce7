//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::record::{FieldFilter, RecordFields, StoredRecord};
use crate::state::{CrawlJob, CrawlState, JobStats, NewJob};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Whether an upsert created a new record or updated an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Trait for storage backend implementations
///
/// Every write is idempotent: repeating an upsert, an absence marker, or a
/// deletion leaves the store in the same state.
pub trait Storage {
    // ===== Job Management =====

    /// Creates a new job record in the `Initializing` state
    ///
    /// # Returns
    ///
    /// The ID of the newly created job
    fn create_job(&mut self, job: &NewJob) -> StorageResult<i64>;

    /// Gets a job snapshot by ID
    fn get_job(&self, job_id: i64) -> StorageResult<CrawlJob>;

    /// Lists all jobs, newest first
    fn list_jobs(&self) -> StorageResult<Vec<CrawlJob>>;

    /// Reads the persisted cancellation flag of a job
    fn read_cancelled(&self, job_id: i64) -> StorageResult<bool>;

    /// Sets the persisted cancellation flag of a job
    fn set_cancelled(&mut self, job_id: i64) -> StorageResult<()>;

    /// Writes the progress counters of a job
    fn write_job_stats(&mut self, job_id: i64, stats: &JobStats) -> StorageResult<()>;

    /// Updates the lifecycle state of a job
    fn update_job_state(&mut self, job_id: i64, state: CrawlState) -> StorageResult<()>;

    /// Writes final counters, the terminal state and a finish timestamp
    fn finish_job(&mut self, job_id: i64, state: CrawlState, stats: &JobStats)
        -> StorageResult<()>;

    // ===== Records =====

    /// Creates or updates a record keyed by its external ID
    ///
    /// An update keeps the record's creation timestamp.
    fn upsert_record(&mut self, record: &RecordFields) -> StorageResult<UpsertOutcome>;

    /// Checks whether a record with this ID is stored
    fn record_exists(&self, id: i64) -> StorageResult<bool>;

    /// Gets a stored record by its external ID
    fn get_record(&self, id: i64) -> StorageResult<Option<StoredRecord>>;

    /// Gets every stored record whose column equals the filter value, by ascending ID
    fn find_records(&self, filter: &FieldFilter) -> StorageResult<Vec<StoredRecord>>;

    /// Lists the IDs of all stored records
    fn list_stored_ids(&self) -> StorageResult<HashSet<i64>>;

    /// Counts stored records
    fn count_records(&self) -> StorageResult<u64>;

    // ===== Absence Markers =====

    /// Records that an ID is permanently absent
    fn mark_absent(&mut self, id: i64, job_id: i64) -> StorageResult<()>;

    /// Lists all IDs marked absent
    fn list_absent_ids(&self) -> StorageResult<HashSet<i64>>;

    /// Deletes an absence marker
    ///
    /// # Returns
    ///
    /// Whether a marker existed
    fn delete_absent(&mut self, id: i64) -> StorageResult<bool>;

    /// Counts absence markers
    fn count_absent(&self) -> StorageResult<u64>;
}
