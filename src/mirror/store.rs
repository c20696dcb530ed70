// ABOUTME: MirrorStore - the local SQLite copy of the monitored remote tables
// ABOUTME: Applies fetched rows with key-based insert-if-absent so retries never duplicate

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params_from_iter, Connection, OptionalExtension};

use super::record::{FieldValue, Record};
use super::schema::MIRROR_SCHEMA;
use super::tables::{CursorKind, CursorValue, MonitoredTable};
use crate::error::SyncError;
use crate::utils::{quote_ident, validate_identifier};

/// Outcome of applying one batch of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// Rows newly written to the mirror.
    pub inserted: u64,
    /// Rows whose key was already present (from an earlier, interrupted cycle).
    pub skipped: u64,
    /// Highest key in the batch; `None` for an empty batch.
    pub max_key: Option<CursorValue>,
}

/// Local mirror database.
///
/// The connection sits behind a mutex so concurrent per-table tasks serialize
/// their writes; each batch is applied in its own transaction.
pub struct MirrorStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl MirrorStore {
    /// Open (creating if needed) the mirror at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::Mirror(format!(
                    "failed to create mirror directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "synchronous", "normal").ok();
        conn.execute_batch(MIRROR_SCHEMA)?;

        tracing::debug!("Opened mirror database {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Mirror("mirror connection mutex poisoned".to_string()))
    }

    /// Insert every row whose key is not yet present, in one transaction.
    ///
    /// Only a conflict on the table's key column is ignored; any other
    /// constraint violation aborts the whole batch so nothing is silently lost.
    pub fn insert_absent(
        &self,
        table: &MonitoredTable,
        rows: &[Record],
    ) -> Result<ApplyOutcome, SyncError> {
        let mut outcome = ApplyOutcome {
            inserted: 0,
            skipped: 0,
            max_key: None,
        };
        if rows.is_empty() {
            return Ok(outcome);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            for row in rows {
                let key = row.key(table)?;
                let columns: Vec<&str> = row.columns().collect();
                for column in &columns {
                    validate_identifier(column)?;
                }

                let query = build_insert_absent_query(table, &columns);
                let mut stmt = tx.prepare_cached(&query)?;
                let changed = stmt.execute(params_from_iter(row.values()))?;
                if changed == 0 {
                    outcome.skipped += 1;
                } else {
                    outcome.inserted += changed as u64;
                }

                if outcome.max_key.as_ref().map_or(true, |max| key > *max) {
                    outcome.max_key = Some(key);
                }
            }
        }
        tx.commit()?;

        Ok(outcome)
    }

    pub fn row_count(&self, table: &MonitoredTable) -> Result<u64, SyncError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table.name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Highest key present locally, if the table has any rows.
    pub fn max_key(&self, table: &MonitoredTable) -> Result<Option<CursorValue>, SyncError> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT MAX({}) FROM {}",
            quote_ident(table.key_column()),
            quote_ident(table.name)
        );
        let value: Option<FieldValue> = conn
            .query_row(&query, [], |row| Ok(FieldValue::from_sql_ref(row.get_ref(0)?)))
            .optional()?;

        match (table.kind, value) {
            (_, None) | (_, Some(FieldValue::Null)) => Ok(None),
            (CursorKind::Id, Some(FieldValue::Integer(id))) => Ok(Some(CursorValue::Id(id))),
            (CursorKind::Date, Some(FieldValue::Text(date))) => CursorValue::date(&date).map(Some),
            (_, Some(other)) => Err(SyncError::Mirror(format!(
                "unexpected key value {:?} in local {}",
                other, table.name
            ))),
        }
    }

    /// Size of the mirror on disk, including the WAL file.
    pub fn size_bytes(&self) -> u64 {
        database_size(&self.path)
    }
}

/// On-disk size of a SQLite database and its WAL file; 0 if neither exists.
pub fn database_size(path: &Path) -> u64 {
    let mut wal = path.as_os_str().to_os_string();
    wal.push("-wal");
    [path.to_path_buf(), PathBuf::from(wal)]
        .iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

/// Build an insert-if-absent statement keyed on the table's cursor column.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "daily_stats" ("date", "total_pnl") VALUES (?1, ?2)
/// ON CONFLICT ("date") DO NOTHING
/// ```
fn build_insert_absent_query(table: &MonitoredTable, columns: &[&str]) -> String {
    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
        quote_ident(table.name),
        quoted_columns.join(", "),
        placeholders.join(", "),
        quote_ident(table.key_column())
    )
}
