// ABOUTME: SyncStateStore - durable per-table cursors and run statistics
// ABOUTME: Atomic write-replace persistence with a monotonic guard on cursor commits

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::engine::SyncCycleResult;
use crate::error::SyncError;
use crate::mirror::tables::{
    lookup, CursorKind, CursorValue, MonitoredTable, EPOCH_DATE, MONITORED_TABLES,
};

/// Persisted progress for one table, in the on-disk shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableCursorRecord {
    #[serde(default)]
    pub last_id: i64,
    /// Only written for date-keyed tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_date: Option<String>,
    /// Epoch seconds. Older state files encode the date-keyed cursor here.
    #[serde(default)]
    pub last_timestamp: f64,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_sync: Option<DateTime<Utc>>,
}

/// Cumulative run counters, updated once per completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatistics {
    #[serde(default)]
    pub total_syncs: u64,
    #[serde(default)]
    pub successful_syncs: u64,
    #[serde(default)]
    pub failed_syncs: u64,
    #[serde(default, rename = "last_sync_duration", alias = "last_duration_seconds")]
    pub last_duration_seconds: f64,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_records_synced: u64,
    /// Written by older sync tools; never updated here, carried so it round-trips.
    #[serde(default)]
    pub data_transferred_mb: f64,
}

impl SyncStatistics {
    /// Fraction of cycles that succeeded; 0.0 before the first cycle.
    pub fn success_rate(&self) -> f64 {
        self.successful_syncs as f64 / self.total_syncs.max(1) as f64
    }
}

/// The whole state document.
///
/// Keys this crate does not know about (the whole-file fallback mode writes
/// `last_size`, `last_mtime` and `sync_count` into the same file) are kept
/// and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStateRecord {
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub table_sync_state: BTreeMap<String, TableCursorRecord>,
    #[serde(default)]
    pub sync_statistics: SyncStatistics,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Resolved cursor view of one monitored table.
///
/// Only the field matching `cursor_kind` is meaningful; the other stays at its
/// zero value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSyncState {
    pub table_name: String,
    pub cursor_kind: CursorKind,
    /// Last mirrored id for id-keyed tables.
    pub last_id: i64,
    /// Last mirrored `YYYY-MM-DD` date for the date-keyed table.
    pub last_date: String,
    /// When the cursor was last committed.
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl TableSyncState {
    /// Zero-value state for a table that has never been synced.
    pub fn new(table: &MonitoredTable) -> Self {
        Self {
            table_name: table.name.to_string(),
            cursor_kind: table.kind,
            last_id: 0,
            last_date: EPOCH_DATE.to_string(),
            last_sync_time: None,
        }
    }

    fn from_record(table: &MonitoredTable, record: &TableCursorRecord) -> Self {
        let mut state = Self::new(table);
        state.last_id = record.last_id.max(0);
        state.last_sync_time = record.last_sync;
        if table.kind == CursorKind::Date {
            let stored = record
                .last_date
                .clone()
                .or_else(|| date_from_epoch(record.last_timestamp));
            if let Some(date) = stored {
                match CursorValue::date(&date) {
                    Ok(_) => state.last_date = date,
                    Err(e) => tracing::warn!(
                        "Ignoring stored cursor for {}: {}. Resyncing from {}",
                        table.name,
                        e,
                        state.last_date
                    ),
                }
            }
        }
        state
    }

    /// The cursor value for comparisons and queries.
    pub fn cursor(&self) -> CursorValue {
        match self.cursor_kind {
            CursorKind::Id => CursorValue::Id(self.last_id),
            CursorKind::Date => CursorValue::Date(self.last_date.clone()),
        }
    }

    /// Registry entry this state belongs to.
    pub fn table(&self) -> Option<&'static MonitoredTable> {
        lookup(&self.table_name)
    }
}

/// Owner of the durable state file. One instance per process, single writer.
#[derive(Debug)]
pub struct SyncStateStore {
    path: PathBuf,
    record: SyncStateRecord,
}

impl SyncStateStore {
    /// Load state from `path`.
    ///
    /// Never fails: a missing file starts from zero cursors, and an unreadable
    /// or corrupt file is logged and treated the same way. Re-fetching rows
    /// that were already mirrored is harmless because apply is idempotent.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let record = match fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<SyncStateRecord>(&contents) {
                Ok(record) => {
                    tracing::info!("Loaded sync state from {:?}", path);
                    record
                }
                Err(e) => {
                    tracing::warn!(
                        "Sync state {:?} is corrupt ({}). Starting from zero cursors.",
                        path,
                        e
                    );
                    SyncStateRecord::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No sync state at {:?}, starting fresh", path);
                SyncStateRecord::default()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read sync state from {:?}: {}. Starting from zero cursors.",
                    path,
                    e
                );
                SyncStateRecord::default()
            }
        };

        Self { path, record }
    }

    /// Default state file location, shared with the whole-file fallback mode.
    pub fn default_path() -> PathBuf {
        PathBuf::from("data/sync_state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &SyncStateRecord {
        &self.record
    }

    pub fn statistics(&self) -> &SyncStatistics {
        &self.record.sync_statistics
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.record.last_sync_time
    }

    /// Current cursor for `table`, zero if it has never been committed.
    pub fn get_cursor(&self, table: &MonitoredTable) -> TableSyncState {
        match self.record.table_sync_state.get(table.name) {
            Some(record) => TableSyncState::from_record(table, record),
            None => TableSyncState::new(table),
        }
    }

    /// Cursors for every monitored table, in registry order.
    pub fn snapshot(&self) -> Vec<TableSyncState> {
        MONITORED_TABLES.iter().map(|t| self.get_cursor(t)).collect()
    }

    /// Durably advance the cursor of `table` to `value`.
    ///
    /// Returns `Ok(false)` without writing when `value` is not strictly beyond
    /// the stored cursor (or is of the wrong kind). On a persist failure the
    /// in-memory state is left as it was, so the stored file stays authoritative.
    pub async fn commit_cursor(
        &mut self,
        table: &MonitoredTable,
        value: &CursorValue,
        at: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        let current = self.get_cursor(table).cursor();
        if !(*value > current) {
            tracing::debug!(
                "Not committing cursor {} for {}: stored cursor is {}",
                value,
                table.name,
                current
            );
            return Ok(false);
        }

        let mut next = self.record.clone();
        let entry = next
            .table_sync_state
            .entry(table.name.to_string())
            .or_default();
        match value {
            CursorValue::Id(id) => {
                entry.last_id = *id;
                entry.last_timestamp = epoch_seconds(at);
            }
            CursorValue::Date(date) => {
                entry.last_date = Some(date.clone());
                entry.last_timestamp = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|midnight| epoch_seconds(Utc.from_utc_datetime(&midnight)))
                    .unwrap_or_default();
            }
        }
        entry.last_sync = Some(at);

        persist(&self.path, &next).await?;
        self.record = next;
        Ok(true)
    }

    /// Fold a completed cycle into the run statistics and persist them.
    ///
    /// The counters are updated in memory even when the write fails; the next
    /// successful persist carries them.
    pub async fn record_cycle_statistics(
        &mut self,
        result: &SyncCycleResult,
        finished_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let stats = &mut self.record.sync_statistics;
        stats.total_syncs += 1;
        if result.success {
            stats.successful_syncs += 1;
        } else {
            stats.failed_syncs += 1;
        }
        stats.last_duration_seconds = result.duration_seconds;
        stats.last_sync_time = Some(finished_at);
        stats.total_records_synced += result.total_records_synced;
        self.record.last_sync_time = Some(finished_at);

        persist(&self.path, &self.record).await
    }
}

/// Write `record` to `<path>.tmp`, fsync it, then rename it over `path`.
async fn persist(path: &Path, record: &SyncStateRecord) -> Result<(), SyncError> {
    let io_err = |what: &str, e: std::io::Error| {
        SyncError::Persist(format!("{} {}: {}", what, path.display(), e))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err("failed to create directory for", e))?;
    }

    let contents = serde_json::to_string_pretty(record)
        .map_err(|e| SyncError::Persist(format!("failed to serialize sync state: {}", e)))?;

    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| io_err("failed to create temp file for", e))?;
    file.write_all(contents.as_bytes())
        .await
        .map_err(|e| io_err("failed to write", e))?;
    file.sync_all()
        .await
        .map_err(|e| io_err("failed to sync", e))?;
    drop(file);

    fs::rename(&tmp, path)
        .await
        .map_err(|e| io_err("failed to replace", e))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Legacy date cursor from epoch seconds, taken as a UTC calendar date so the
/// result does not depend on the host's time zone.
fn date_from_epoch(timestamp: f64) -> Option<String> {
    if timestamp <= 0.0 {
        return None;
    }
    Utc.timestamp_opt(timestamp as i64, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d").to_string())
}

/// Accept RFC 3339, or a naive ISO timestamp read as UTC. Anything else is absent.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse_timestamp))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}
