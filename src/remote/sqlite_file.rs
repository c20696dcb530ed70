// ABOUTME: RemoteQueryChannel over a directly reachable SQLite file (mounted volume, local copy)
// ABOUTME: Produces the same list/JSON text as the sqlite3 CLI, bounded by a query timeout

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};

use super::channel::{OutputMode, RemoteQueryChannel};
use crate::error::SyncError;
use crate::mirror::record::{FieldValue, Record};

/// Default bound on one query, matching `[remote] command_timeout_secs`.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Queries a SQLite database file read-only, opening it fresh for every query so
/// writes made by the owning process between calls are always visible.
///
/// Each query runs on the blocking pool under a timeout, so a stalled mount
/// fails that query with [`SyncError::Transport`] instead of holding a runtime
/// worker.
pub struct SqliteFileChannel {
    path: PathBuf,
    timeout: Duration,
}

impl SqliteFileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn run_query(path: &Path, query: &str, mode: OutputMode) -> Result<String, SyncError> {
    // A missing or unreadable file is the equivalent of an unreachable host.
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| SyncError::Transport(format!("cannot open {}: {}", path.display(), e)))?;

    let query_error = |e: rusqlite::Error| SyncError::RemoteQuery {
        status: None,
        message: e.to_string(),
    };

    let mut stmt = conn.prepare(query).map_err(query_error)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query([]).map_err(query_error)?;

    let mut records = Vec::new();
    while let Some(row) = rows.next().map_err(query_error)? {
        let mut fields = Vec::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(query_error)?;
            fields.push((name.clone(), FieldValue::from_sql_ref(value)));
        }
        records.push(Record::new(fields));
    }

    Ok(match mode {
        OutputMode::List => render_list(&records),
        OutputMode::Json => render_json(&records),
    })
}

/// `sqlite3` list mode: `|`-separated columns, NULL as an empty string.
fn render_list(records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        let line = record
            .values()
            .map(|value| match value {
                FieldValue::Null => String::new(),
                FieldValue::Integer(i) => i.to_string(),
                FieldValue::Real(f) => f.to_string(),
                FieldValue::Text(s) => s.clone(),
                FieldValue::Blob(b) => String::from_utf8_lossy(b).into_owned(),
            })
            .collect::<Vec<_>>()
            .join("|");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// `sqlite3 -json`: nothing at all for an empty result set.
fn render_json(records: &[Record]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let rows: Vec<serde_json::Value> = records.iter().map(Record::to_json).collect();
    serde_json::Value::Array(rows).to_string()
}

#[async_trait]
impl RemoteQueryChannel for SqliteFileChannel {
    async fn execute(&self, query: &str, mode: OutputMode) -> Result<String, SyncError> {
        let path = self.path.clone();
        let sql = query.to_string();
        let task = tokio::task::spawn_blocking(move || run_query(&path, &sql, mode));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SyncError::Transport(format!("query task failed: {}", e))),
            Err(_) => Err(SyncError::Transport(format!(
                "query against {} timed out after {:?}",
                self.path.display(),
                self.timeout
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::record::parse_json_rows;
    use tempfile::tempdir;

    fn source_db(dir: &Path) -> PathBuf {
        let path = dir.join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE signals_received (id INTEGER PRIMARY KEY, symbol TEXT, atr_value REAL);
             INSERT INTO signals_received VALUES (1, 'BTCUSDT', 12.5), (2, NULL, NULL);",
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_list_mode_matches_sqlite3() {
        let dir = tempdir().unwrap();
        let channel = SqliteFileChannel::new(source_db(dir.path()));

        let out = channel
            .execute("SELECT COUNT(*) FROM signals_received WHERE id > 0;", OutputMode::List)
            .await
            .unwrap();
        assert_eq!(out, "2\n");

        let out = channel
            .execute("SELECT MAX(id) FROM signals_received WHERE id > 5;", OutputMode::List)
            .await
            .unwrap();
        assert_eq!(out, "\n");

        let out = channel
            .execute("SELECT id, symbol FROM signals_received ORDER BY id;", OutputMode::List)
            .await
            .unwrap();
        assert_eq!(out, "1|BTCUSDT\n2|\n");
    }

    #[tokio::test]
    async fn test_json_mode_round_trips_through_parser() {
        let dir = tempdir().unwrap();
        let channel = SqliteFileChannel::new(source_db(dir.path()));

        let out = channel
            .execute("SELECT * FROM signals_received ORDER BY id;", OutputMode::Json)
            .await
            .unwrap();
        let rows = parse_json_rows(&out).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("atr_value"), Some(&FieldValue::Real(12.5)));
        assert_eq!(rows[1].get("symbol"), Some(&FieldValue::Null));

        let empty = channel
            .execute("SELECT * FROM signals_received WHERE id > 100;", OutputMode::Json)
            .await
            .unwrap();
        assert_eq!(empty, "");
    }

    #[tokio::test]
    async fn test_failures_are_classified() {
        let dir = tempdir().unwrap();
        let missing = SqliteFileChannel::new(dir.path().join("absent.db"));
        let err = missing.execute("SELECT 1;", OutputMode::List).await.unwrap_err();
        assert!(err.is_transport());

        let channel = SqliteFileChannel::new(source_db(dir.path()));
        let err = channel
            .execute("SELECT COUNT(*) FROM no_such_table;", OutputMode::List)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteQuery { .. }));
    }

    #[tokio::test]
    async fn test_channel_is_read_only() {
        let dir = tempdir().unwrap();
        let channel = SqliteFileChannel::new(source_db(dir.path()));
        let err = channel
            .execute("DELETE FROM signals_received;", OutputMode::List)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteQuery { .. }));
    }

    #[tokio::test]
    async fn test_blocked_database_times_out_as_transport() {
        let dir = tempdir().unwrap();
        let path = source_db(dir.path());

        // An exclusive writer keeps readers waiting on the busy handler.
        let writer = Connection::open(&path).unwrap();
        writer.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let channel = SqliteFileChannel::new(&path).with_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = channel
            .execute("SELECT COUNT(*) FROM signals_received;", OutputMode::List)
            .await
            .unwrap_err();
        assert!(err.is_transport(), "{:?}", err);
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(2));

        writer.execute_batch("ROLLBACK;").unwrap();
    }
}
