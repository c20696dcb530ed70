// ABOUTME: IncrementalSyncEngine - fetches rows beyond each cursor and applies them locally
// ABOUTME: Paged ascending reads, idempotent apply, cursor advanced only to what was applied

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;

use super::detector::{ChangeSummary, RemoteChangeDetector};
use super::state::TableSyncState;
use crate::error::SyncError;
use crate::mirror::record::{parse_json_rows, Record};
use crate::mirror::store::{ApplyOutcome, MirrorStore};
use crate::mirror::tables::{CursorValue, MonitoredTable};
use crate::remote::channel::{OutputMode, RemoteQueryChannel};
use crate::remote::query;

/// Result of syncing one table in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSyncResult {
    pub table_name: String,
    pub success: bool,
    /// Rows fetched and applied (new or already present locally).
    pub records_synced: u64,
    /// Rows that were new to the mirror.
    pub records_inserted: u64,
    /// Highest key applied this cycle, the candidate for the next cursor.
    pub advanced_cursor: Option<CursorValue>,
    pub error: Option<SyncError>,
}

impl TableSyncResult {
    fn unchanged(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            success: true,
            records_synced: 0,
            records_inserted: 0,
            advanced_cursor: None,
            error: None,
        }
    }

    fn failed(table_name: &str, error: SyncError) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::unchanged(table_name)
        }
    }
}

/// Aggregated result of one pass over every table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncCycleResult {
    pub tables_processed: usize,
    pub total_records_synced: u64,
    pub per_table_results: BTreeMap<String, TableSyncResult>,
    pub errors: Vec<String>,
    pub success: bool,
    pub duration_seconds: f64,
}

impl SyncCycleResult {
    /// Record a table failure discovered after the engine finished (e.g. at commit).
    pub fn mark_failed(&mut self, table_name: &str, error: SyncError) {
        self.errors.push(format!("{}: {}", table_name, error));
        self.success = false;
        if let Some(result) = self.per_table_results.get_mut(table_name) {
            result.success = false;
            result.error.get_or_insert(error);
        }
    }
}

/// How the engine decides which tables have a delta.
#[derive(Debug, Clone, Copy)]
pub enum SyncPlan<'a> {
    /// Probe each table before fetching.
    Probe,
    /// Use reports from a detection pass that already ran this cycle.
    Detected(&'a ChangeSummary),
    /// Fetch beyond every cursor without probing.
    Force,
}

/// Paging position within one table's delta.
#[derive(Debug)]
pub struct RecordPager {
    pub table: &'static MonitoredTable,
    /// Key of the last row returned; the next page starts strictly after it.
    pub after: CursorValue,
    pub page_size: usize,
    pub pages_fetched: u64,
    pub exhausted: bool,
}

/// Moves each table's delta from the remote channel into the mirror.
///
/// The engine never touches the state store: it reports the highest applied
/// key per table and leaves committing it to the caller.
pub struct IncrementalSyncEngine {
    detector: RemoteChangeDetector,
    channel: Arc<dyn RemoteQueryChannel>,
    mirror: Arc<MirrorStore>,
    page_size: usize,
}

impl IncrementalSyncEngine {
    pub fn new(
        channel: Arc<dyn RemoteQueryChannel>,
        mirror: Arc<MirrorStore>,
        page_size: usize,
    ) -> Self {
        Self {
            detector: RemoteChangeDetector::new(Arc::clone(&channel)),
            channel,
            mirror,
            page_size: page_size.max(1),
        }
    }

    pub fn detector(&self) -> &RemoteChangeDetector {
        &self.detector
    }

    /// Sync one table from `cursor`.
    ///
    /// Unless `force` is set the table is probed first and a table without
    /// pending rows returns a zero-record success without fetching anything.
    pub async fn sync_table(
        &self,
        table: &'static MonitoredTable,
        cursor: &CursorValue,
        force: bool,
    ) -> TableSyncResult {
        if !force {
            let report = self.detector.check_table_changes(table, cursor).await;
            if let Some(error) = report.error {
                return TableSyncResult::failed(table.name, error);
            }
            if !report.has_changes {
                return TableSyncResult::unchanged(table.name);
            }
        }
        self.sync_delta(table, cursor).await
    }

    /// Fetch and apply every page beyond `cursor`.
    async fn sync_delta(
        &self,
        table: &'static MonitoredTable,
        cursor: &CursorValue,
    ) -> TableSyncResult {
        let mut pager = self.fetch_new_records(table, cursor);
        let mut result = TableSyncResult::unchanged(table.name);

        loop {
            let page = match self.next_page(&mut pager).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => return Self::fail_after(result, e),
            };

            let page_len = page.len();
            match self.apply_records(table, page).await {
                Ok(outcome) => {
                    result.records_synced += outcome.inserted + outcome.skipped;
                    result.records_inserted += outcome.inserted;
                    if outcome.max_key.is_some() {
                        result.advanced_cursor = outcome.max_key;
                    }
                    if outcome.skipped > 0 {
                        tracing::debug!(
                            "{}: {} of {} rows were already mirrored",
                            table.name,
                            outcome.skipped,
                            page_len
                        );
                    }
                }
                Err(e) => return Self::fail_after(result, e),
            }

            if pager.pages_fetched % 10 == 0 {
                tracing::info!(
                    "Progress: {} - {} rows applied ({} pages), at {}",
                    table.name,
                    result.records_synced,
                    pager.pages_fetched,
                    pager.after
                );
            }
        }

        match &result.advanced_cursor {
            Some(advanced) => tracing::info!(
                "Synced {}: {} rows ({} new), cursor {} -> {}",
                table.name,
                result.records_synced,
                result.records_inserted,
                cursor,
                advanced
            ),
            None => tracing::debug!("No rows fetched for {} beyond {}", table.name, cursor),
        }
        result
    }

    /// A failure after some pages were applied keeps the cursor pinned at the
    /// last applied key and reports the partial progress.
    fn fail_after(mut result: TableSyncResult, error: SyncError) -> TableSyncResult {
        tracing::error!("Failed to sync {}: {:?}", result.table_name, error);
        result.success = false;
        result.error = Some(if result.records_synced > 0 {
            SyncError::PartialApply {
                applied: result.records_synced,
                reason: error.to_string(),
            }
        } else {
            error
        });
        result
    }

    /// Start paging through the rows of `table` beyond `cursor`.
    pub fn fetch_new_records(
        &self,
        table: &'static MonitoredTable,
        cursor: &CursorValue,
    ) -> RecordPager {
        RecordPager {
            table,
            after: cursor.clone(),
            page_size: self.page_size,
            pages_fetched: 0,
            exhausted: false,
        }
    }

    /// Fetch the next page, or `None` once the delta is exhausted.
    ///
    /// Rows must come back strictly ascending and beyond the pager position;
    /// anything else would make the applied maximum an unsafe cursor.
    pub async fn next_page(
        &self,
        pager: &mut RecordPager,
    ) -> Result<Option<Vec<Record>>, SyncError> {
        if pager.exhausted {
            return Ok(None);
        }

        let sql = query::fetch_page(pager.table, &pager.after, pager.page_size);
        let output = self.channel.execute(&sql, OutputMode::Json).await?;
        let rows = parse_json_rows(&output)?;
        pager.pages_fetched += 1;

        if rows.is_empty() {
            pager.exhausted = true;
            return Ok(None);
        }
        if rows.len() > pager.page_size {
            return Err(SyncError::Parse(format!(
                "{} returned {} rows for a page of {}",
                pager.table.name,
                rows.len(),
                pager.page_size
            )));
        }

        let mut previous = pager.after.clone();
        for row in &rows {
            let key = row.key(pager.table)?;
            if !(key > previous) {
                return Err(SyncError::Parse(format!(
                    "{} rows out of order: {} after {}",
                    pager.table.name, key, previous
                )));
            }
            previous = key;
        }

        if rows.len() < pager.page_size {
            pager.exhausted = true;
        }
        pager.after = previous;
        Ok(Some(rows))
    }

    /// Insert rows whose key is not yet mirrored, as one transaction.
    pub async fn apply_records(
        &self,
        table: &'static MonitoredTable,
        rows: Vec<Record>,
    ) -> Result<ApplyOutcome, SyncError> {
        let mirror = Arc::clone(&self.mirror);
        tokio::task::spawn_blocking(move || mirror.insert_absent(table, &rows))
            .await
            .map_err(|e| SyncError::Mirror(format!("apply task failed: {}", e)))?
    }

    /// Sync every table in `states` concurrently, isolating failures per table.
    pub async fn sync_all_tables(
        &self,
        states: &[TableSyncState],
        plan: SyncPlan<'_>,
    ) -> SyncCycleResult {
        let started = Instant::now();

        let results = join_all(states.iter().map(|state| async move {
            let Some(table) = state.table() else {
                return TableSyncResult::failed(
                    &state.table_name,
                    SyncError::Config(format!("{} is not a monitored table", state.table_name)),
                );
            };
            let cursor = state.cursor();
            match plan {
                SyncPlan::Probe => self.sync_table(table, &cursor, false).await,
                SyncPlan::Force => self.sync_table(table, &cursor, true).await,
                SyncPlan::Detected(summary) => match summary.report(table.name) {
                    Some(report) if report.is_failure() => TableSyncResult::failed(
                        table.name,
                        report.error.clone().unwrap_or_else(|| {
                            SyncError::Transport("change detection failed".to_string())
                        }),
                    ),
                    Some(report) if !report.has_changes => TableSyncResult::unchanged(table.name),
                    Some(_) => self.sync_delta(table, &cursor).await,
                    None => self.sync_table(table, &cursor, false).await,
                },
            }
        }))
        .await;

        let mut cycle = SyncCycleResult {
            tables_processed: results.len(),
            success: true,
            ..SyncCycleResult::default()
        };
        for result in results {
            cycle.total_records_synced += result.records_synced;
            if let Some(error) = &result.error {
                cycle.errors.push(format!("{}: {}", result.table_name, error));
                cycle.success = false;
            }
            cycle.per_table_results.insert(result.table_name.clone(), result);
        }
        cycle.duration_seconds = started.elapsed().as_secs_f64();
        cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::record::FieldValue;
    use crate::mirror::tables::lookup;
    use crate::remote::sqlite_file::SqliteFileChannel;
    use rusqlite::Connection;
    use std::path::Path;
    use tempfile::tempdir;

    fn source_with_results(
        dir: &Path,
        ids: std::ops::RangeInclusive<i64>,
    ) -> Arc<dyn RemoteQueryChannel> {
        let path = dir.join("remote.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(crate::mirror::schema::MIRROR_SCHEMA).unwrap();
        for id in ids {
            conn.execute(
                "INSERT INTO trading_results (id, client_order_id,
                 symbol, final_pnl, result_timestamp)
                 VALUES (?1, 'ord_' || ?1, 'BTCUSDT', 1.5, ?2)",
                rusqlite::params![id, 1_704_448_800.0 + id as f64],
            )
            .unwrap();
        }
        Arc::new(SqliteFileChannel::new(path))
    }

    fn engine(
        dir: &Path,
        channel: Arc<dyn RemoteQueryChannel>,
        page_size: usize,
    ) -> IncrementalSyncEngine {
        let mirror = Arc::new(MirrorStore::open(dir.join("mirror.db")).unwrap());
        IncrementalSyncEngine::new(channel, mirror, page_size)
    }

    #[test]
    fn test_cycle_result_mark_failed() {
        let mut cycle = SyncCycleResult {
            success: true,
            ..SyncCycleResult::default()
        };
        cycle.per_table_results.insert(
            "orders_executed".into(),
            TableSyncResult::unchanged("orders_executed"),
        );
        cycle.mark_failed("orders_executed", SyncError::Persist("disk full".into()));
        assert!(!cycle.success);
        assert_eq!(cycle.errors.len(), 1);
        assert!(!cycle.per_table_results["orders_executed"].success);
    }

    #[tokio::test]
    async fn test_pages_until_exhausted() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), source_with_results(dir.path(), 1..=7), 3);
        let table = lookup("trading_results").unwrap();

        let mut pager = engine.fetch_new_records(table, &CursorValue::Id(0));
        let mut sizes = Vec::new();
        while let Some(page) = engine.next_page(&mut pager).await.unwrap() {
            sizes.push(page.len());
        }
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(pager.after, CursorValue::Id(7));
        assert_eq!(pager.pages_fetched, 3);
    }

    #[tokio::test]
    async fn test_sync_table_applies_and_advances() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), source_with_results(dir.path(), 1000..=1007), 3);
        let table = lookup("trading_results").unwrap();

        let result = engine.sync_table(table, &CursorValue::Id(1000), false).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.records_synced, 7);
        assert_eq!(result.records_inserted, 7);
        assert_eq!(result.advanced_cursor, Some(CursorValue::Id(1007)));
        assert_eq!(engine.mirror.row_count(table).unwrap(), 7);

        let again = engine.sync_table(table, &CursorValue::Id(1007), false).await;
        assert!(again.success);
        assert_eq!(again.records_synced, 0);
        assert_eq!(again.advanced_cursor, None);
    }

    #[tokio::test]
    async fn test_apply_records_is_idempotent() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), source_with_results(dir.path(), 1..=1), 10);
        let table = lookup("ml_signal_quality").unwrap();
        let row = Record::new(vec![
            ("id".into(), FieldValue::Integer(1)),
            ("session_id".into(), FieldValue::Text("s-20240105".into())),
            ("recommendation".into(), FieldValue::Text("EXECUTE".into())),
        ]);

        let first = engine.apply_records(table, vec![row.clone()]).await.unwrap();
        let second = engine.apply_records(table, vec![row]).await.unwrap();
        assert_eq!((first.inserted, second.inserted, second.skipped), (1, 0, 1));
        assert_eq!(engine.mirror.row_count(table).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_remote_table_fails_only_that_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE daily_stats (date TEXT PRIMARY KEY, total_signals INTEGER);
             INSERT INTO daily_stats VALUES ('2024-01-06', 3);",
        )
        .unwrap();
        let engine = engine(dir.path(), Arc::new(SqliteFileChannel::new(path)), 100);

        let states = vec![
            TableSyncState::new(lookup("daily_stats").unwrap()),
            TableSyncState::new(lookup("orders_executed").unwrap()),
        ];
        let cycle = engine.sync_all_tables(&states, SyncPlan::Probe).await;

        assert_eq!(cycle.tables_processed, 2);
        assert!(!cycle.success);
        assert_eq!(cycle.total_records_synced, 1);
        assert!(cycle.per_table_results["daily_stats"].success);
        assert_eq!(
            cycle.per_table_results["daily_stats"].advanced_cursor,
            Some(CursorValue::Date("2024-01-06".into()))
        );
        let orders = &cycle.per_table_results["orders_executed"];
        assert!(matches!(orders.error, Some(SyncError::RemoteQuery { .. })));
        assert_eq!(orders.advanced_cursor, None);
        assert_eq!(cycle.errors.len(), 1);
    }
}
