// ABOUTME: Incremental sync module - cursors, change detection, fetch/apply and cycle control
// ABOUTME: Mirrors append-only remote tables by moving only rows beyond each table's cursor

pub mod daemon;
pub mod detector;
pub mod engine;
pub mod orchestrator;
pub mod state;

pub use daemon::{DaemonStats, SyncDaemon};
pub use detector::{ChangeReport, ChangeSummary, RemoteChangeDetector};
pub use engine::{IncrementalSyncEngine, RecordPager, SyncCycleResult, SyncPlan, TableSyncResult};
pub use orchestrator::{CyclePhase, SkipReason, SyncOrchestrator, SyncRunReport, SyncStatus};
pub use state::{SyncStateRecord, SyncStateStore, SyncStatistics, TableCursorRecord, TableSyncState};
