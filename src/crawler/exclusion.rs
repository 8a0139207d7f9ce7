//! Exclusion set tracking
//!
//! Holds a snapshot of the IDs a run must skip. The snapshot is rebuilt from
//! storage every few iterations, so it may lag behind writes made since.

use crate::state::CrawlMode;
use crate::storage::{with_storage, Storage, StorageResult};
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug)]
pub struct ExclusionTracker {
    mode: CrawlMode,
    ids: HashSet<i64>,
}

impl ExclusionTracker {
    pub fn new(mode: CrawlMode) -> Self {
        Self {
            mode,
            ids: HashSet::new(),
        }
    }

    /// Rebuilds the snapshot for the tracker's mode
    ///
    /// - `Fresh`: absent IDs only
    /// - `Missing`: absent IDs and IDs with a stored record
    ///
    /// On error the previous snapshot is kept.
    pub fn refresh<S: Storage>(&mut self, storage: &Mutex<S>) -> StorageResult<usize> {
        let mode = self.mode;
        let ids = with_storage(storage, |s| {
            let mut ids = s.list_absent_ids()?;
            if mode == CrawlMode::Missing {
                ids.extend(s.list_stored_ids()?);
            }
            Ok(ids)
        })?;

        self.ids = ids;
        tracing::debug!("Exclusion set refreshed: {} IDs", self.ids.len());
        Ok(self.ids.len())
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
