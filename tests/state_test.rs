use chrono::Utc;
use signal_mirror::mirror::{lookup, CursorValue, MONITORED_TABLES};
use signal_mirror::sync::{SyncCycleResult, SyncStateStore};
use tempfile::tempdir;

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let state_file = temp_dir.path().join("data").join("sync_state.json");

    let mut store = SyncStateStore::load(&state_file).await;
    let signals = lookup("signals_received").unwrap();
    let daily = lookup("daily_stats").unwrap();
    store
        .commit_cursor(signals, &CursorValue::Id(1007), Utc::now())
        .await
        .unwrap();
    store
        .commit_cursor(daily, &CursorValue::date("2024-01-07").unwrap(), Utc::now())
        .await
        .unwrap();

    let cycle = SyncCycleResult {
        tables_processed: MONITORED_TABLES.len(),
        total_records_synced: 9,
        success: true,
        duration_seconds: 1.5,
        ..SyncCycleResult::default()
    };
    store.record_cycle_statistics(&cycle, Utc::now()).await.unwrap();

    let restarted = SyncStateStore::load(&state_file).await;
    assert_eq!(restarted.get_cursor(signals).cursor(), CursorValue::Id(1007));
    assert_eq!(
        restarted.get_cursor(daily).cursor(),
        CursorValue::Date("2024-01-07".to_string())
    );
    let stats = restarted.statistics();
    assert_eq!(stats.total_syncs, 1);
    assert_eq!(stats.successful_syncs, 1);
    assert_eq!(stats.total_records_synced, 9);
    assert_eq!(stats.last_duration_seconds, 1.5);
    assert!(restarted.last_sync_time().is_some());
}

#[tokio::test]
async fn test_state_file_uses_dashboard_field_names() {
    let temp_dir = tempdir().unwrap();
    let state_file = temp_dir.path().join("sync_state.json");

    let mut store = SyncStateStore::load(&state_file).await;
    let failed = SyncCycleResult {
        success: false,
        duration_seconds: 0.25,
        ..SyncCycleResult::default()
    };
    store.record_cycle_statistics(&failed, Utc::now()).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&state_file).unwrap()).unwrap();
    assert!(raw["last_sync_time"].is_string());
    assert!(raw["table_sync_state"].is_object());
    assert_eq!(raw["sync_statistics"]["total_syncs"], 1);
    assert_eq!(raw["sync_statistics"]["failed_syncs"], 1);
    assert_eq!(raw["sync_statistics"]["last_sync_duration"], 0.25);
}

#[tokio::test]
async fn test_whole_file_mode_keys_are_preserved() {
    let temp_dir = tempdir().unwrap();
    let state_file = temp_dir.path().join("sync_state.json");
    std::fs::write(
        &state_file,
        r#"{"last_size": 2097152, "last_mtime": 1704448800.5, "sync_count": 14}"#,
    )
    .unwrap();

    let mut store = SyncStateStore::load(&state_file).await;
    store
        .commit_cursor(
            lookup("orders_executed").unwrap(),
            &CursorValue::Id(42),
            Utc::now(),
        )
        .await
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&state_file).unwrap()).unwrap();
    assert_eq!(raw["sync_count"], 14);
    assert_eq!(raw["last_size"], 2097152);
    assert_eq!(raw["table_sync_state"]["orders_executed"]["last_id"], 42);
}

#[tokio::test]
async fn test_corrupt_state_yields_usable_defaults() {
    let temp_dir = tempdir().unwrap();
    let state_file = temp_dir.path().join("sync_state.json");
    std::fs::write(&state_file, "\0\0\0 truncated by power loss").unwrap();

    let mut store = SyncStateStore::load(&state_file).await;
    for state in store.snapshot() {
        assert_eq!(state.cursor(), state.table().unwrap().zero_cursor());
    }

    // The first commit replaces the corrupt file.
    store
        .commit_cursor(
            lookup("trading_results").unwrap(),
            &CursorValue::Id(3),
            Utc::now(),
        )
        .await
        .unwrap();
    let reloaded = SyncStateStore::load(&state_file).await;
    assert_eq!(
        reloaded.get_cursor(lookup("trading_results").unwrap()).cursor(),
        CursorValue::Id(3)
    );
}
