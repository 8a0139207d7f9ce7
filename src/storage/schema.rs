//! Database schema definitions
//!
//! The `records` table is derived from the record schema so its columns can
//! never drift from [`RECORD_FIELDS`].

use crate::record::{FieldType, RECORD_FIELDS};

/// SQL schema for the job and absence tables
pub const SCHEMA_SQL: &str = r#"
-- Track crawl jobs
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_id INTEGER NOT NULL,
    end_id INTEGER NOT NULL,
    max_requests_per_second INTEGER NOT NULL,
    mode TEXT NOT NULL,
    consecutive_invalid_threshold INTEGER NOT NULL,
    total_requests INTEGER NOT NULL DEFAULT 0,
    total_request_time REAL NOT NULL DEFAULT 0.0,
    items_scraped INTEGER NOT NULL DEFAULT 0,
    consecutive_invalid INTEGER NOT NULL DEFAULT 0,
    cancelled INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT
);

-- IDs the external resource reported as not found
CREATE TABLE IF NOT EXISTS absent_ids (
    id INTEGER PRIMARY KEY,
    recorded_at TEXT NOT NULL,
    job_id INTEGER
);
"#;

fn column_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Bool | FieldType::Integer => "INTEGER",
        FieldType::Float => "REAL",
        FieldType::Text => "TEXT",
    }
}

/// Builds the `CREATE TABLE` statement for stored records
pub fn records_table_sql() -> String {
    let columns: Vec<String> = RECORD_FIELDS
        .iter()
        .map(|spec| format!("    {} {}", spec.name, column_type(spec.field_type)))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS records (\n    id INTEGER PRIMARY KEY,\n    schema_version INTEGER NOT NULL,\n{},\n    created_at TEXT NOT NULL,\n    updated_at TEXT NOT NULL\n);",
        columns.join(",\n")
    )
}

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(&records_table_sql())?;
    Ok(())
}
