//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Record upserts keyed by external ID
//! - Absence markers for IDs the resource reported as not found
//! - Job records, progress counters and the cancellation flag

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult, UpsertOutcome};

use crate::SweepError;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Storage shared between a run, its registry and status queries
pub type SharedStorage<S> = Arc<Mutex<S>>;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage, SweepError> {
    SqliteStorage::new(path)
}

/// Runs `f` against the locked storage
///
/// The guard never outlives the call, so it is never held across an `.await`.
pub fn with_storage<S, T>(
    storage: &Mutex<S>,
    f: impl FnOnce(&mut S) -> StorageResult<T>,
) -> StorageResult<T> {
    let mut guard = storage.lock().map_err(|_| StorageError::LockPoisoned)?;
    f(&mut guard)
}
