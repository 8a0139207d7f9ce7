//! Output module for reporting crawl results
//!
//! This module handles:
//! - Database statistics (records, absence markers, jobs)
//! - Job snapshots for status queries
//! - Run summaries
//! - Stored records as JSON, by ID or by field value

pub mod stats;

pub use stats::{load_statistics, print_job, print_statistics, print_summary, CrawlStatistics};

use crate::record::FieldFilter;
use crate::storage::{Storage, StorageError};
use crate::SweepError;
use serde_json::Value;

/// Renders a stored record as pretty-printed JSON
///
/// # Returns
///
/// * `Ok(Some(String))` - The record exists
/// * `Ok(None)` - No record is stored under this ID
/// * `Err(SweepError)` - Failed to query or serialize the record
pub fn render_record(storage: &dyn Storage, id: i64) -> Result<Option<String>, SweepError> {
    let Some(record) = storage.get_record(id)? else {
        return Ok(None);
    };

    Ok(Some(to_pretty_json(&record.to_json())?))
}

/// Renders every stored record matching a `FIELD=VALUE` query as a JSON array
///
/// # Errors
///
/// * `SweepError::Record` - the query is malformed, names an unknown field,
///   or carries a value of the wrong type
pub fn render_matches(storage: &dyn Storage, query: &str) -> Result<(usize, String), SweepError> {
    let filter: FieldFilter = query.parse()?;
    let records = storage.find_records(&filter)?;

    let array = Value::Array(records.iter().map(|r| r.to_json()).collect());
    Ok((records.len(), to_pretty_json(&array)?))
}

fn to_pretty_json(value: &Value) -> Result<String, SweepError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| StorageError::Serialization(e.to_string()).into())
}
