// ABOUTME: Typed row model for records fetched from the remote node
// ABOUTME: Converts sqlite3 JSON output into ordered, typed fields keyed by column name

use crate::error::SyncError;
use crate::mirror::tables::{CursorKind, CursorValue, MonitoredTable};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde_json::Value as JsonValue;

/// A single column value, mirroring SQLite's storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl FieldValue {
    /// Convert one JSON cell produced by `sqlite3 -json`.
    ///
    /// Blobs travel as arrays of byte values.
    pub fn from_json(value: &JsonValue) -> Result<Self, SyncError> {
        match value {
            JsonValue::Null => Ok(FieldValue::Null),
            JsonValue::Bool(b) => Ok(FieldValue::Integer(i64::from(*b))),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(FieldValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(FieldValue::Real(f))
                } else {
                    Err(SyncError::Parse(format!("number out of range: {}", n)))
                }
            }
            JsonValue::String(s) => Ok(FieldValue::Text(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| {
                            SyncError::Parse("blob array must contain bytes".to_string())
                        })
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(FieldValue::Blob),
            JsonValue::Object(_) => Err(SyncError::Parse(
                "nested objects are not valid column values".to_string(),
            )),
        }
    }

    /// Convert back to JSON in the same shape `from_json` accepts.
    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Null => JsonValue::Null,
            FieldValue::Integer(i) => JsonValue::from(*i),
            FieldValue::Real(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            FieldValue::Text(s) => JsonValue::String(s.clone()),
            FieldValue::Blob(bytes) => {
                JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect())
            }
        }
    }

    pub fn from_sql_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => FieldValue::Null,
            ValueRef::Integer(i) => FieldValue::Integer(i),
            ValueRef::Real(f) => FieldValue::Real(f),
            ValueRef::Text(t) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => FieldValue::Blob(b.to_vec()),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            FieldValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
        })
    }
}

/// One fetched row: column names paired with typed values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new(fields: Vec<(String, FieldValue)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.fields.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Extract this row's cursor key for `table`.
    ///
    /// Fails when the key column is missing or has the wrong type, since such a
    /// row cannot be placed relative to the cursor.
    pub fn key(&self, table: &MonitoredTable) -> Result<CursorValue, SyncError> {
        let column = table.key_column();
        match (table.kind, self.get(column)) {
            (CursorKind::Id, Some(FieldValue::Integer(id))) => Ok(CursorValue::Id(*id)),
            (CursorKind::Date, Some(FieldValue::Text(date))) => CursorValue::date(date),
            (_, Some(other)) => Err(SyncError::Parse(format!(
                "{}.{} has unexpected value {:?}",
                table.name, column, other
            ))),
            (_, None) => Err(SyncError::Parse(format!(
                "row from {} is missing key column '{}'",
                table.name, column
            ))),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let map = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }
}

/// Parse the output of a `sqlite3 -json` query into records.
///
/// `sqlite3` prints nothing at all for an empty result set, so blank output is
/// zero rows rather than an error.
pub fn parse_json_rows(output: &str) -> Result<Vec<Record>, SyncError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<serde_json::Map<String, JsonValue>> = serde_json::from_str(trimmed)
        .map_err(|e| SyncError::Parse(format!("rows are not a JSON array of objects: {}", e)))?;

    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(name, value)| FieldValue::from_json(&value).map(|v| (name, v)))
                .collect::<Result<Vec<_>, _>>()
                .map(Record::new)
        })
        .collect()
}
