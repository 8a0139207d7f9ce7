//! Record schema and payload filtering
//!
//! Payloads from the external resource are arbitrary JSON objects. Only the
//! fields declared in [`RECORD_FIELDS`] are stored, each with a declared type.
//!
//! # Filtering policy (schema version 1)
//!
//! | input | stored as |
//! |-------|-----------|
//! | declared field, matching JSON type | the value |
//! | declared field, nested array/object | NULL |
//! | declared field, mismatched scalar type | NULL |
//! | declared field, missing or `null` | NULL |
//! | undeclared field | dropped |
//!
//! A payload that is not an object, has no positive integer `id`, or whose `id`
//! differs from the ID that was requested is rejected.

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

/// Version of the record schema written alongside every stored record
pub const SCHEMA_VERSION: u32 = 1;

/// Declared type of a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Integer,
    Float,
    Text,
}

/// A field of the record schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
}

const fn field(name: &'static str, field_type: FieldType) -> FieldSpec {
    FieldSpec { name, field_type }
}

/// Allow-listed record fields, in column order
pub const RECORD_FIELDS: &[FieldSpec] = &[
    field("adult", FieldType::Bool),
    field("backdrop_path", FieldType::Text),
    field("budget", FieldType::Integer),
    field("homepage", FieldType::Text),
    field("imdb_id", FieldType::Text),
    field("original_language", FieldType::Text),
    field("original_title", FieldType::Text),
    field("overview", FieldType::Text),
    field("popularity", FieldType::Float),
    field("poster_path", FieldType::Text),
    field("release_date", FieldType::Text),
    field("revenue", FieldType::Integer),
    field("runtime", FieldType::Integer),
    field("status", FieldType::Text),
    field("tagline", FieldType::Text),
    field("title", FieldType::Text),
    field("video", FieldType::Bool),
    field("vote_average", FieldType::Float),
    field("vote_count", FieldType::Integer),
];

/// Errors raised while filtering a payload
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Payload has no positive integer 'id'")]
    MissingId,

    #[error("Payload id {found} does not match requested id {expected}")]
    IdMismatch { expected: i64, found: i64 },

    #[error("Expected FIELD=VALUE, got '{0}'")]
    MalformedFilter(String),

    #[error("Unknown record field '{0}'")]
    UnknownField(String),

    #[error("'{value}' is not a valid {field_type:?} value for field '{field}'")]
    InvalidValue {
        field: String,
        field_type: FieldType,
        value: String,
    },
}

/// The key column, filterable like any declared field
pub const ID_FIELD: FieldSpec = field("id", FieldType::Integer);

/// Looks up a declared field, or the `id` key column, by name
pub fn field_spec(name: &str) -> Option<FieldSpec> {
    if name == ID_FIELD.name {
        return Some(ID_FIELD);
    }
    RECORD_FIELDS.iter().copied().find(|spec| spec.name == name)
}

/// Equality filter on one record column, parsed from `FIELD=VALUE`
///
/// The value is parsed according to the field's declared type. Booleans
/// accept `true`/`false` and `1`/`0`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: FieldSpec,
    pub value: SqlValue,
}

impl FromStr for FieldFilter {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, raw) = s
            .split_once('=')
            .ok_or_else(|| RecordError::MalformedFilter(s.to_string()))?;
        let name = name.trim();
        let field = field_spec(name).ok_or_else(|| RecordError::UnknownField(name.to_string()))?;

        let invalid = || RecordError::InvalidValue {
            field: field.name.to_string(),
            field_type: field.field_type,
            value: raw.to_string(),
        };

        let value = match field.field_type {
            FieldType::Bool => match raw.trim().to_lowercase().as_str() {
                "true" | "1" => SqlValue::Integer(1),
                "false" | "0" => SqlValue::Integer(0),
                _ => return Err(invalid()),
            },
            FieldType::Integer => SqlValue::Integer(raw.trim().parse().map_err(|_| invalid())?),
            FieldType::Float => SqlValue::Real(raw.trim().parse().map_err(|_| invalid())?),
            FieldType::Text => SqlValue::Text(raw.to_string()),
        };

        Ok(Self { field, value })
    }
}

/// A payload reduced to the declared schema, ready to be upserted
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFields {
    pub id: i64,
    /// One value per entry of [`RECORD_FIELDS`], in the same order
    pub values: Vec<SqlValue>,
}

impl RecordFields {
    /// Filters a payload fetched for `expected_id`
    pub fn from_payload(expected_id: i64, payload: &Value) -> Result<Self, RecordError> {
        let object = payload.as_object().ok_or(RecordError::NotAnObject)?;

        let id = object
            .get("id")
            .and_then(Value::as_i64)
            .filter(|id| *id > 0)
            .ok_or(RecordError::MissingId)?;

        if id != expected_id {
            return Err(RecordError::IdMismatch {
                expected: expected_id,
                found: id,
            });
        }

        let values = RECORD_FIELDS
            .iter()
            .map(|spec| coerce(spec, object.get(spec.name)))
            .collect();

        Ok(Self { id, values })
    }
}

fn coerce(spec: &FieldSpec, value: Option<&Value>) -> SqlValue {
    let Some(value) = value else {
        return SqlValue::Null;
    };

    let coerced = match (spec.field_type, value) {
        (_, Value::Null) => Some(SqlValue::Null),
        (_, Value::Array(_) | Value::Object(_)) => None,
        (FieldType::Bool, Value::Bool(b)) => Some(SqlValue::Integer(i64::from(*b))),
        (FieldType::Integer, Value::Number(n)) => n.as_i64().map(SqlValue::Integer),
        (FieldType::Float, Value::Number(n)) => n.as_f64().map(SqlValue::Real),
        (FieldType::Text, Value::String(s)) => Some(SqlValue::Text(s.clone())),
        _ => None,
    };

    coerced.unwrap_or_else(|| {
        tracing::debug!(
            "Dropping value of field '{}' (expected {:?}, got {})",
            spec.name,
            spec.field_type,
            value
        );
        SqlValue::Null
    })
}

/// Converts a stored column back to JSON according to its declared type
pub fn to_json(spec: &FieldSpec, value: &SqlValue) -> Value {
    match (spec.field_type, value) {
        (FieldType::Bool, SqlValue::Integer(i)) => Value::Bool(*i != 0),
        (_, SqlValue::Integer(i)) => Value::from(*i),
        (_, SqlValue::Real(f)) => Value::from(*f),
        (_, SqlValue::Text(s)) => Value::String(s.clone()),
        _ => Value::Null,
    }
}

/// A record read back from storage
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub schema_version: u32,
    pub fields: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl StoredRecord {
    /// Renders the record as a JSON object including its bookkeeping columns
    pub fn to_json(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("id".to_string(), Value::from(self.id));
        object.insert("_schema_version".to_string(), Value::from(self.schema_version));
        object.insert("_created_at".to_string(), Value::from(self.created_at.clone()));
        object.insert("_updated_at".to_string(), Value::from(self.updated_at.clone()));
        Value::Object(object)
    }
}
