// ABOUTME: SyncOrchestrator - runs one detect/sync/commit/statistics cycle at a time
// ABOUTME: Owns the state store and mirror handles, exposes run reports and a status snapshot

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::engine::{IncrementalSyncEngine, SyncCycleResult, SyncPlan, TableSyncResult};
use super::state::{SyncStateStore, TableSyncState};
use crate::mirror::store::MirrorStore;
use crate::mirror::tables::lookup;
use crate::remote::channel::RemoteQueryChannel;

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Detecting,
    Syncing,
    Committing,
}

/// Why a run did no sync work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoChanges,
    CycleInProgress,
}

/// Outcome of one `run` call.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunReport {
    /// False when the run was skipped; see `skip_reason`.
    pub sync_performed: bool,
    pub skip_reason: Option<SkipReason>,
    /// True when every table succeeded, and for skipped runs.
    pub success: bool,
    pub duration_seconds: f64,
    pub tables_processed: usize,
    /// Rows applied this run, new or already mirrored.
    pub total_records_synced: u64,
    /// Per-table outcomes in table-name order.
    pub table_results: Vec<TableSyncResult>,
    /// One `table: error` line per failed table.
    pub errors: Vec<String>,
}

impl SyncRunReport {
    fn skipped(reason: SkipReason, duration_seconds: f64) -> Self {
        Self {
            sync_performed: false,
            skip_reason: Some(reason),
            success: true,
            duration_seconds,
            tables_processed: 0,
            total_records_synced: 0,
            table_results: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn performed(result: SyncCycleResult) -> Self {
        Self {
            sync_performed: true,
            skip_reason: None,
            success: result.success,
            duration_seconds: result.duration_seconds,
            tables_processed: result.tables_processed,
            total_records_synced: result.total_records_synced,
            table_results: result.per_table_results.into_values().collect(),
            errors: result.errors,
        }
    }
}

/// Read-only snapshot for the CLI and the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// End of the last completed cycle; `None` before the first one.
    pub last_sync_time: Option<DateTime<Utc>>,
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    /// `successful_syncs / total_syncs`, 0.0 before the first cycle.
    pub success_rate: f64,
    pub last_duration_seconds: f64,
    pub total_records_synced: u64,
    /// Mirror database plus its WAL file, in bytes.
    pub mirror_size_bytes: u64,
    pub phase: CyclePhase,
    /// Committed cursors in registry order.
    pub tables: Vec<TableSyncState>,
}

impl SyncStatus {
    pub fn new(store: &SyncStateStore, mirror_size_bytes: u64, phase: CyclePhase) -> Self {
        let stats = store.statistics();
        Self {
            last_sync_time: store.last_sync_time(),
            total_syncs: stats.total_syncs,
            successful_syncs: stats.successful_syncs,
            failed_syncs: stats.failed_syncs,
            success_rate: stats.success_rate(),
            last_duration_seconds: stats.last_duration_seconds,
            total_records_synced: stats.total_records_synced,
            mirror_size_bytes,
            phase,
            tables: store.snapshot(),
        }
    }
}

/// Sets the shared phase and puts it back to `Idle` however the cycle ends.
struct PhaseGuard<'a> {
    phase: &'a StdMutex<CyclePhase>,
}

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a StdMutex<CyclePhase>, initial: CyclePhase) -> Self {
        let guard = Self { phase };
        guard.set(initial);
        guard
    }

    fn set(&self, next: CyclePhase) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = next;
        }
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.set(CyclePhase::Idle);
    }
}

/// Runs sync cycles. Construct one per process and share it by reference.
///
/// Only one cycle runs at a time: a `run` that starts while another is in
/// progress returns immediately with [`SkipReason::CycleInProgress`].
pub struct SyncOrchestrator {
    engine: IncrementalSyncEngine,
    mirror: Arc<MirrorStore>,
    store: Mutex<SyncStateStore>,
    cycle: Mutex<()>,
    phase: StdMutex<CyclePhase>,
}

impl SyncOrchestrator {
    pub fn new(
        channel: Arc<dyn RemoteQueryChannel>,
        mirror: Arc<MirrorStore>,
        store: SyncStateStore,
        page_size: usize,
    ) -> Self {
        Self {
            engine: IncrementalSyncEngine::new(channel, Arc::clone(&mirror), page_size),
            mirror,
            store: Mutex::new(store),
            cycle: Mutex::new(()),
            phase: StdMutex::new(CyclePhase::Idle),
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(CyclePhase::Idle)
    }

    /// Run one cycle. `force` skips change detection and fetches beyond every cursor.
    ///
    /// Always returns a report; table failures are recorded in it, never raised.
    pub async fn run(&self, force: bool) -> SyncRunReport {
        let Ok(_cycle) = self.cycle.try_lock() else {
            tracing::warn!("Sync cycle already in progress, skipping this request");
            return SyncRunReport::skipped(SkipReason::CycleInProgress, 0.0);
        };

        let started = Instant::now();
        let phase = PhaseGuard::enter(&self.phase, CyclePhase::Detecting);
        let states = self.store.lock().await.snapshot();

        let summary = if force {
            tracing::info!("Forced sync: skipping change detection");
            None
        } else {
            let summary = self.engine.detector().check_all_tables(&states).await;
            if !summary.has_any_changes && summary.failed_tables.is_empty() {
                tracing::info!("No remote changes detected, nothing to sync");
                return SyncRunReport::skipped(
                    SkipReason::NoChanges,
                    started.elapsed().as_secs_f64(),
                );
            }
            if !summary.failed_tables.is_empty() {
                tracing::warn!(
                    "Change detection failed for: {}",
                    summary.failed_tables.join(", ")
                );
            }
            tracing::info!(
                "Detected {} new rows across {} tables",
                summary.total_new_records,
                summary
                    .per_table_reports
                    .iter()
                    .filter(|r| r.has_changes)
                    .count()
            );
            Some(summary)
        };

        phase.set(CyclePhase::Syncing);
        let plan = match &summary {
            Some(summary) => SyncPlan::Detected(summary),
            None => SyncPlan::Force,
        };
        let mut result = self.engine.sync_all_tables(&states, plan).await;

        phase.set(CyclePhase::Committing);
        let mut store = self.store.lock().await;
        let committed_at = Utc::now();
        let to_commit: Vec<_> = result
            .per_table_results
            .values()
            .filter(|r| r.records_synced > 0)
            .filter_map(|r| Some((r.table_name.clone(), r.advanced_cursor.clone()?)))
            .collect();

        for (table_name, cursor) in to_commit {
            let Some(table) = lookup(&table_name) else {
                continue;
            };
            match store.commit_cursor(table, &cursor, committed_at).await {
                Ok(true) => tracing::info!("Committed cursor {} for {}", cursor, table_name),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Failed to commit cursor for {}: {:?}", table_name, e);
                    result.mark_failed(&table_name, e);
                }
            }
        }

        result.duration_seconds = started.elapsed().as_secs_f64();
        if let Err(e) = store.record_cycle_statistics(&result, Utc::now()).await {
            tracing::warn!("Failed to persist sync statistics: {}", e);
        }
        drop(store);

        if result.success {
            tracing::info!(
                "Sync cycle completed: {} rows across {} tables in {:.2}s",
                result.total_records_synced,
                result.tables_processed,
                result.duration_seconds
            );
        } else {
            tracing::warn!(
                "Sync cycle finished with {} errors ({} rows synced)",
                result.errors.len(),
                result.total_records_synced
            );
        }

        SyncRunReport::performed(result)
    }

    /// Statistics, cursors and mirror size, without touching the remote.
    pub async fn get_status(&self) -> SyncStatus {
        let store = self.store.lock().await;
        SyncStatus::new(&store, self.mirror.size_bytes(), self.phase())
    }
}
