// ABOUTME: Shared fixtures for integration tests - a fake remote node and instrumented channels
// ABOUTME: The remote side is a temp SQLite file reached through SqliteFileChannel

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use signal_mirror::mirror::schema::MIRROR_SCHEMA;
use signal_mirror::remote::{OutputMode, RemoteQueryChannel, SqliteFileChannel};
use signal_mirror::SyncError;

/// The operational node's database.
pub struct RemoteNode {
    pub path: PathBuf,
}

impl RemoteNode {
    pub fn create(dir: &Path) -> Self {
        let path = dir.join("remote_trading_signals.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch(MIRROR_SCHEMA)
            .unwrap();
        Self { path }
    }

    fn conn(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }

    pub fn add_signals(&self, ids: impl IntoIterator<Item = i64>) {
        let conn = self.conn();
        for id in ids {
            conn.execute(
                "INSERT INTO signals_received (id, timestamp, signal_type,
                 symbol, side, signal_data_json)
                 VALUES (?1, ?2, 'trend', 'BTCUSDT', 'BUY', '{\"atr\":12.5}')",
                params![id, 1_704_448_800.0 + id as f64],
            )
            .unwrap();
        }
    }

    pub fn add_orders(&self, ids: impl IntoIterator<Item = i64>) {
        let conn = self.conn();
        for id in ids {
            conn.execute(
                "INSERT INTO orders_executed (id, signal_id, client_order_id,
                 symbol, side, leverage)
                 VALUES (?1, ?1, 'ord_' || ?1, 'ETHUSDT', 'SELL', 10)",
                params![id],
            )
            .unwrap();
        }
    }

    pub fn add_results(&self, ids: impl IntoIterator<Item = i64>) {
        let conn = self.conn();
        for id in ids {
            conn.execute(
                "INSERT INTO trading_results (id, order_id, client_order_id,
                 symbol, final_pnl, is_successful)
                 VALUES (?1, ?1, 'ord_' || ?1, 'ETHUSDT', 3.25, 1)",
                params![id],
            )
            .unwrap();
        }
    }

    pub fn add_daily(&self, dates: &[&str]) {
        let conn = self.conn();
        for date in dates {
            conn.execute(
                "INSERT INTO daily_stats (date, total_signals, total_pnl) VALUES (?1, 12, 40.5)",
                params![date],
            )
            .unwrap();
        }
    }
}

/// Count rows in a local mirror table.
pub fn local_count(mirror: &Path, table: &str) -> i64 {
    Connection::open(mirror)
        .unwrap()
        .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
            row.get(0)
        })
        .unwrap()
}

/// Wraps the file channel: counts row fetches, fails chosen tables, optionally slows down.
pub struct InstrumentedChannel {
    inner: SqliteFileChannel,
    failing: Mutex<HashSet<String>>,
    /// Table whose row fetches fail once the remaining budget is spent.
    fetch_budget: Mutex<Option<(String, usize)>>,
    fetches: AtomicUsize,
    probes: AtomicUsize,
    delay: Option<Duration>,
}

impl InstrumentedChannel {
    pub fn new(remote: &RemoteNode) -> Arc<Self> {
        Arc::new(Self::build(remote, None))
    }

    pub fn slow(remote: &RemoteNode, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(remote, Some(delay)))
    }

    fn build(remote: &RemoteNode, delay: Option<Duration>) -> Self {
        Self {
            inner: SqliteFileChannel::new(&remote.path),
            failing: Mutex::new(HashSet::new()),
            fetch_budget: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            delay,
        }
    }

    /// Every query against `table` fails as if the connection timed out.
    pub fn fail_table(&self, table: &str) {
        self.failing.lock().unwrap().insert(table.to_string());
    }

    /// Let `pages` row fetches against `table` through, then fail the rest.
    pub fn fail_fetches_after(&self, table: &str, pages: usize) {
        *self.fetch_budget.lock().unwrap() = Some((table.to_string(), pages));
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        *self.fetch_budget.lock().unwrap() = None;
    }

    /// Row-fetch (JSON mode) calls so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteQueryChannel for InstrumentedChannel {
    async fn execute(&self, query: &str, mode: OutputMode) -> Result<String, SyncError> {
        match mode {
            OutputMode::Json => self.fetches.fetch_add(1, Ordering::SeqCst),
            OutputMode::List => self.probes.fetch_add(1, Ordering::SeqCst),
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|table| query.contains(&format!("\"{}\"", table)));
        let out_of_budget = mode == OutputMode::Json
            && match self.fetch_budget.lock().unwrap().as_mut() {
                Some((table, remaining)) if query.contains(&format!("\"{}\"", table)) => {
                    if *remaining == 0 {
                        true
                    } else {
                        *remaining -= 1;
                        false
                    }
                }
                _ => false,
            };
        if failing || out_of_budget {
            return Err(SyncError::Transport(
                "ssh: connect to host 10.0.0.5 port 22: Connection timed out".to_string(),
            ));
        }

        self.inner.execute(query, mode).await
    }

    fn describe(&self) -> String {
        format!("instrumented {}", self.inner.describe())
    }
}
