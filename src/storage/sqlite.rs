//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::record::{self, FieldFilter, RecordFields, StoredRecord, RECORD_FIELDS, SCHEMA_VERSION};
use crate::state::{CrawlJob, CrawlMode, CrawlState, JobStats, NewJob};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult, UpsertOutcome};
use crate::SweepError;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Map;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const JOB_COLUMNS: &str = "id, start_id, end_id, max_requests_per_second, mode,
     consecutive_invalid_threshold, total_requests, total_request_time, items_scraped,
     consecutive_invalid, cancelled, state, started_at, finished_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(SweepError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, SweepError> {
        let conn = Connection::open(path)?;

        // WAL lets a second process flip a job's cancelled flag while a run writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, SweepError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_ids(&self, sql: &str) -> StorageResult<HashSet<i64>> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<i64>, _>>()?;
        Ok(ids)
    }

    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Raw job columns, converted to a [`CrawlJob`] once the row is read
struct JobRow {
    job_id: i64,
    start_id: i64,
    end_id: i64,
    max_requests_per_second: u32,
    mode: String,
    consecutive_invalid_threshold: u32,
    total_requests: i64,
    total_request_time: f64,
    items_scraped: i64,
    consecutive_invalid: u32,
    cancelled: bool,
    state: String,
    started_at: String,
    finished_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            start_id: row.get(1)?,
            end_id: row.get(2)?,
            max_requests_per_second: row.get(3)?,
            mode: row.get(4)?,
            consecutive_invalid_threshold: row.get(5)?,
            total_requests: row.get(6)?,
            total_request_time: row.get(7)?,
            items_scraped: row.get(8)?,
            consecutive_invalid: row.get(9)?,
            cancelled: row.get(10)?,
            state: row.get(11)?,
            started_at: row.get(12)?,
            finished_at: row.get(13)?,
        })
    }

    fn into_job(self) -> StorageResult<CrawlJob> {
        let mode: CrawlMode = self
            .mode
            .parse()
            .map_err(|e| StorageError::Serialization(format!("job {}: {}", self.job_id, e)))?;
        let state = CrawlState::from_db_string(&self.state).ok_or_else(|| {
            StorageError::Serialization(format!(
                "job {}: unknown state '{}'",
                self.job_id, self.state
            ))
        })?;

        Ok(CrawlJob {
            job_id: self.job_id,
            start_id: self.start_id,
            end_id: self.end_id,
            max_requests_per_second: self.max_requests_per_second,
            mode,
            consecutive_invalid_threshold: self.consecutive_invalid_threshold,
            stats: JobStats {
                total_requests: self.total_requests.max(0) as u64,
                total_request_time: Duration::try_from_secs_f64(self.total_request_time)
                    .unwrap_or_default(),
                items_scraped: self.items_scraped.max(0) as u64,
                consecutive_invalid: self.consecutive_invalid,
            },
            cancelled: self.cancelled,
            state,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

fn select_records_sql(condition: &str) -> String {
    let names: Vec<&str> = RECORD_FIELDS.iter().map(|spec| spec.name).collect();
    format!(
        "SELECT id, schema_version, created_at, updated_at, {} FROM records WHERE {}",
        names.join(", "),
        condition
    )
}

fn stored_record_from_row(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let mut fields = Map::new();
    for (idx, spec) in RECORD_FIELDS.iter().enumerate() {
        let value: SqlValue = row.get(idx + 4)?;
        fields.insert(spec.name.to_string(), record::to_json(spec, &value));
    }

    Ok(StoredRecord {
        id: row.get(0)?,
        schema_version: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        fields,
    })
}

impl Storage for SqliteStorage {
    // ===== Job Management =====

    fn create_job(&mut self, job: &NewJob) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO jobs (start_id, end_id, max_requests_per_second, mode,
             consecutive_invalid_threshold, state, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.start_id,
                job.end_id,
                job.max_requests_per_second,
                job.mode.to_db_string(),
                job.consecutive_invalid_threshold,
                CrawlState::Initializing.to_db_string(),
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_job(&self, job_id: i64) -> StorageResult<CrawlJob> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                JobRow::from_row,
            )
            .optional()?
            .ok_or(StorageError::JobNotFound(job_id))?;

        row.into_job()
    }

    fn list_jobs(&self) -> StorageResult<Vec<CrawlJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM jobs ORDER BY id DESC", JOB_COLUMNS))?;

        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    fn read_cancelled(&self, job_id: i64) -> StorageResult<bool> {
        self.conn
            .query_row(
                "SELECT cancelled FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StorageError::JobNotFound(job_id))
    }

    fn set_cancelled(&mut self, job_id: i64) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE jobs SET cancelled = 1 WHERE id = ?1",
            params![job_id],
        )?;

        if updated == 0 {
            return Err(StorageError::JobNotFound(job_id));
        }
        Ok(())
    }

    fn write_job_stats(&mut self, job_id: i64, stats: &JobStats) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE jobs SET total_requests = ?1, total_request_time = ?2, items_scraped = ?3,
             consecutive_invalid = ?4 WHERE id = ?5",
            params![
                stats.total_requests as i64,
                stats.total_request_time.as_secs_f64(),
                stats.items_scraped as i64,
                stats.consecutive_invalid,
                job_id
            ],
        )?;
        Ok(())
    }

    fn update_job_state(&mut self, job_id: i64, state: CrawlState) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE jobs SET state = ?1 WHERE id = ?2",
            params![state.to_db_string(), job_id],
        )?;
        Ok(())
    }

    fn finish_job(
        &mut self,
        job_id: i64,
        state: CrawlState,
        stats: &JobStats,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE jobs SET total_requests = ?1, total_request_time = ?2, items_scraped = ?3,
             consecutive_invalid = ?4, state = ?5, finished_at = ?6 WHERE id = ?7",
            params![
                stats.total_requests as i64,
                stats.total_request_time.as_secs_f64(),
                stats.items_scraped as i64,
                stats.consecutive_invalid,
                state.to_db_string(),
                now,
                job_id
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ===== Records =====

    fn upsert_record(&mut self, record: &RecordFields) -> StorageResult<UpsertOutcome> {
        if record.values.len() != RECORD_FIELDS.len() {
            return Err(StorageError::Serialization(format!(
                "record {} has {} values, schema declares {}",
                record.id,
                record.values.len(),
                RECORD_FIELDS.len()
            )));
        }

        let existed = self.record_exists(record.id)?;

        let names: Vec<&str> = RECORD_FIELDS.iter().map(|spec| spec.name).collect();
        let placeholders: Vec<String> = (1..=names.len() + 4).map(|i| format!("?{}", i)).collect();
        let updates: Vec<String> = names
            .iter()
            .map(|name| format!("{name} = excluded.{name}"))
            .collect();

        let sql = format!(
            "INSERT INTO records (id, schema_version, {}, created_at, updated_at) VALUES ({})
             ON CONFLICT(id) DO UPDATE SET schema_version = excluded.schema_version, {},
             updated_at = excluded.updated_at",
            names.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        );

        let now = Utc::now().to_rfc3339();
        let mut values = Vec::with_capacity(record.values.len() + 4);
        values.push(SqlValue::Integer(record.id));
        values.push(SqlValue::Integer(i64::from(SCHEMA_VERSION)));
        values.extend(record.values.iter().cloned());
        values.push(SqlValue::Text(now.clone()));
        values.push(SqlValue::Text(now));

        self.conn.execute(&sql, params_from_iter(values))?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    fn record_exists(&self, id: i64) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM records WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn get_record(&self, id: i64) -> StorageResult<Option<StoredRecord>> {
        let record = self
            .conn
            .query_row(
                &select_records_sql("id = ?1"),
                params![id],
                stored_record_from_row,
            )
            .optional()?;

        Ok(record)
    }

    fn find_records(&self, filter: &FieldFilter) -> StorageResult<Vec<StoredRecord>> {
        // Column names are interpolated, so only schema columns get through
        if record::field_spec(filter.field.name) != Some(filter.field) {
            return Err(StorageError::Database(format!(
                "unknown record column '{}'",
                filter.field.name
            )));
        }

        let sql = format!(
            "{} ORDER BY id",
            select_records_sql(&format!("{} = ?1", filter.field.name))
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![filter.value], stored_record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn list_stored_ids(&self) -> StorageResult<HashSet<i64>> {
        self.query_ids("SELECT id FROM records")
    }

    fn count_records(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM records")
    }

    // ===== Absence Markers =====

    fn mark_absent(&mut self, id: i64, job_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR IGNORE INTO absent_ids (id, recorded_at, job_id) VALUES (?1, ?2, ?3)",
            params![id, now, job_id],
        )?;
        Ok(())
    }

    fn list_absent_ids(&self) -> StorageResult<HashSet<i64>> {
        self.query_ids("SELECT id FROM absent_ids")
    }

    fn delete_absent(&mut self, id: i64) -> StorageResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM absent_ids WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn count_absent(&self) -> StorageResult<u64> {
        self.count("SELECT COUNT(*) FROM absent_ids")
    }
}
