// ABOUTME: RemoteChangeDetector - cheap per-table probes for rows beyond the cursor
// ABOUTME: Transfers only a count and a boundary key; failures never read as "no changes"

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use super::state::TableSyncState;
use crate::error::SyncError;
use crate::mirror::tables::{CursorKind, CursorValue, MonitoredTable};
use crate::remote::channel::{OutputMode, RemoteQueryChannel};
use crate::remote::query;

/// Probe outcome for one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeReport {
    pub table_name: String,
    pub has_changes: bool,
    pub new_count: u64,
    /// Highest remote key beyond the cursor; `None` when nothing is pending.
    pub latest_cursor_value: Option<CursorValue>,
    /// Set when the probe failed. `has_changes` is then meaningless.
    pub error: Option<SyncError>,
}

impl ChangeReport {
    fn unchanged(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            has_changes: false,
            new_count: 0,
            latest_cursor_value: None,
            error: None,
        }
    }

    fn failed(table_name: &str, error: SyncError) -> Self {
        Self {
            error: Some(error),
            ..Self::unchanged(table_name)
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregated probe results for one cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSummary {
    pub has_any_changes: bool,
    pub total_new_records: u64,
    pub per_table_reports: Vec<ChangeReport>,
    /// Tables whose probe failed.
    pub failed_tables: Vec<String>,
}

impl ChangeSummary {
    pub fn report(&self, table_name: &str) -> Option<&ChangeReport> {
        self.per_table_reports
            .iter()
            .find(|r| r.table_name == table_name)
    }
}

/// Answers "does this table have rows beyond its cursor?" with two bounded
/// probe queries per table, without transferring any rows.
#[derive(Clone)]
pub struct RemoteChangeDetector {
    channel: Arc<dyn RemoteQueryChannel>,
}

impl RemoteChangeDetector {
    pub fn new(channel: Arc<dyn RemoteQueryChannel>) -> Self {
        Self { channel }
    }

    /// Count and bound the rows of `table` beyond `cursor`.
    pub async fn check_table_changes(
        &self,
        table: &MonitoredTable,
        cursor: &CursorValue,
    ) -> ChangeReport {
        match self.probe(table, cursor).await {
            Ok((0, _)) => {
                tracing::debug!("No new rows in {} beyond {}", table.name, cursor);
                ChangeReport::unchanged(table.name)
            }
            Ok((count, latest)) => {
                tracing::info!(
                    "{}: {} new rows beyond {} (latest {})",
                    table.name,
                    count,
                    cursor,
                    latest
                );
                ChangeReport {
                    table_name: table.name.to_string(),
                    has_changes: true,
                    new_count: count,
                    latest_cursor_value: Some(latest),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Change detection failed for {}: {}", table.name, e);
                ChangeReport::failed(table.name, e)
            }
        }
    }

    /// Returns the pending row count and, when it is non-zero, the boundary key.
    async fn probe(
        &self,
        table: &MonitoredTable,
        cursor: &CursorValue,
    ) -> Result<(u64, CursorValue), SyncError> {
        let output = self
            .channel
            .execute(&query::count_since(table, cursor), OutputMode::List)
            .await?;
        let count = parse_count(&output)?;
        if count == 0 {
            return Ok((0, cursor.clone()));
        }

        let output = self
            .channel
            .execute(&query::max_key_since(table, cursor), OutputMode::List)
            .await?;
        let latest = parse_boundary(table, &output)?.ok_or_else(|| {
            SyncError::Parse(format!(
                "{} reported {} new rows but no maximum key",
                table.name, count
            ))
        })?;
        if !(latest > *cursor) {
            return Err(SyncError::Parse(format!(
                "{} maximum key {} is not beyond cursor {}",
                table.name, latest, cursor
            )));
        }

        Ok((count, latest))
    }

    /// Probe every table in `states` concurrently.
    pub async fn check_all_tables(&self, states: &[TableSyncState]) -> ChangeSummary {
        let reports = join_all(states.iter().map(|state| async move {
            match state.table() {
                Some(table) => self.check_table_changes(table, &state.cursor()).await,
                None => ChangeReport::failed(
                    &state.table_name,
                    SyncError::Config(format!("{} is not a monitored table", state.table_name)),
                ),
            }
        }))
        .await;

        let mut summary = ChangeSummary::default();
        for report in reports {
            if report.is_failure() {
                summary.failed_tables.push(report.table_name.clone());
            } else if report.has_changes {
                summary.has_any_changes = true;
                summary.total_new_records += report.new_count;
            }
            summary.per_table_reports.push(report);
        }
        summary
    }
}

/// Parse a `COUNT(*)` result. Empty output means no matching rows.
pub fn parse_count(output: &str) -> Result<u64, SyncError> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(value) = lines.next() else {
        return Ok(0);
    };
    if lines.next().is_some() {
        return Err(SyncError::Parse(format!(
            "expected a single count, got {:?}",
            output.trim()
        )));
    }
    value
        .parse::<u64>()
        .map_err(|_| SyncError::Parse(format!("count is not a number: {:?}", value)))
}

/// Parse a `MAX(key)` result into a cursor of the table's kind.
pub fn parse_boundary(
    table: &MonitoredTable,
    output: &str,
) -> Result<Option<CursorValue>, SyncError> {
    let value = output.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match table.kind {
        CursorKind::Id => value.parse::<i64>().map(CursorValue::Id).map(Some).map_err(|_| {
            SyncError::Parse(format!("{} maximum id is not an integer: {:?}", table.name, value))
        }),
        CursorKind::Date => CursorValue::date(value).map(Some),
    }
}
