// ABOUTME: Local mirror schema for the monitored trading tables
// ABOUTME: Matches the operational node's layout so fetched rows insert column-for-column

/// DDL for every monitored table plus lookup indexes.
///
/// Foreign keys are left out: tables are synced independently and a result row
/// may land before the order it references.
pub const MIRROR_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signals_received (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp REAL NOT NULL,
    signal_type TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    open_price REAL,
    close_price REAL,
    prev_close REAL,
    prev_open REAL,
    atr_value REAL,
    opposite INTEGER,
    strategy_name TEXT,
    quantity TEXT,
    order_type TEXT,
    margin_type TEXT,
    precision INTEGER,
    tp_multiplier REAL,
    signal_data_json TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS orders_executed (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_id INTEGER,
    client_order_id TEXT UNIQUE NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    order_type TEXT,
    quantity REAL,
    price REAL,
    leverage INTEGER,
    execution_timestamp REAL,
    execution_delay_ms INTEGER,
    binance_order_id TEXT,
    status TEXT DEFAULT 'NEW',
    is_add_position BOOLEAN DEFAULT 0,
    tp_client_id TEXT,
    sl_client_id TEXT,
    tp_price REAL,
    sl_price REAL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS trading_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER,
    client_order_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    final_pnl REAL,
    pnl_percentage REAL,
    holding_time_minutes INTEGER,
    exit_method TEXT,
    max_drawdown REAL,
    max_profit REAL,
    entry_price REAL,
    exit_price REAL,
    total_quantity REAL,
    result_timestamp REAL,
    is_successful BOOLEAN,
    trade_quality_score REAL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS daily_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT UNIQUE NOT NULL,
    total_signals INTEGER DEFAULT 0,
    total_orders INTEGER DEFAULT 0,
    successful_trades INTEGER DEFAULT 0,
    failed_trades INTEGER DEFAULT 0,
    win_rate REAL DEFAULT 0,
    total_pnl REAL DEFAULT 0,
    best_trade REAL DEFAULT 0,
    worst_trade REAL DEFAULT 0,
    avg_holding_time REAL DEFAULT 0,
    signal_type_stats TEXT,
    symbol_stats TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS ml_features_v2 (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    signal_id INTEGER,
    strategy_win_rate_recent REAL DEFAULT 0.0,
    strategy_win_rate_overall REAL DEFAULT 0.0,
    strategy_market_fitness REAL DEFAULT 0.0,
    volatility_match_score REAL DEFAULT 0.0,
    time_slot_match_score REAL DEFAULT 0.0,
    symbol_match_score REAL DEFAULT 0.0,
    price_momentum_strength REAL DEFAULT 0.0,
    atr_relative_position REAL DEFAULT 0.0,
    risk_reward_ratio REAL DEFAULT 0.0,
    execution_difficulty REAL DEFAULT 0.0,
    consecutive_win_streak INTEGER DEFAULT 0,
    consecutive_loss_streak INTEGER DEFAULT 0,
    system_overall_performance REAL DEFAULT 0.0,
    signal_confidence_score REAL DEFAULT 0.0,
    market_condition_fitness REAL DEFAULT 0.0,
    price_deviation_percent REAL DEFAULT 0.0,
    price_deviation_abs REAL DEFAULT 0.0,
    atr_normalized_deviation REAL DEFAULT 0.0,
    candle_direction INTEGER DEFAULT 0,
    candle_body_size REAL DEFAULT 0.0,
    candle_wick_ratio REAL DEFAULT 0.0,
    price_position_in_range REAL DEFAULT 0.0,
    upward_adjustment_space REAL DEFAULT 0.0,
    downward_adjustment_space REAL DEFAULT 0.0,
    historical_best_adjustment REAL DEFAULT 0.0,
    price_reachability_score REAL DEFAULT 0.0,
    entry_price_quality_score REAL DEFAULT 0.0,
    hour_of_day INTEGER DEFAULT 0,
    trading_session INTEGER DEFAULT 0,
    weekend_factor INTEGER DEFAULT 0,
    symbol_category INTEGER DEFAULT 0,
    current_positions INTEGER DEFAULT 0,
    margin_ratio REAL DEFAULT 0.0,
    atr_normalized REAL DEFAULT 0.0,
    volatility_regime INTEGER DEFAULT 0,
    market_trend_strength REAL DEFAULT 0.0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS ml_signal_quality (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    signal_id INTEGER,
    decision_method TEXT DEFAULT 'RULE_BASED',
    recommendation TEXT,
    confidence_score REAL,
    execution_probability REAL,
    reason TEXT,
    reasoning_details TEXT,
    model_version TEXT DEFAULT 'v1.0',
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_signals_timestamp ON signals_received(timestamp);
CREATE INDEX IF NOT EXISTS idx_signals_type_symbol ON signals_received(signal_type, symbol);
CREATE INDEX IF NOT EXISTS idx_orders_client_id ON orders_executed(client_order_id);
CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders_executed(symbol);
CREATE INDEX IF NOT EXISTS idx_results_timestamp ON trading_results(result_timestamp);
CREATE INDEX IF NOT EXISTS idx_daily_stats_date ON daily_stats(date);
CREATE INDEX IF NOT EXISTS idx_ml_features_signal_id ON ml_features_v2(signal_id);
CREATE INDEX IF NOT EXISTS idx_ml_features_session_id ON ml_features_v2(session_id);
CREATE INDEX IF NOT EXISTS idx_ml_quality_signal_id ON ml_signal_quality(signal_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::tables::MONITORED_TABLES;
    use rusqlite::Connection;

    #[test]
    fn test_schema_creates_every_monitored_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIRROR_SCHEMA).unwrap();

        for table in MONITORED_TABLES {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table.name],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "{} missing from mirror schema", table.name);
        }
    }

    #[test]
    fn test_schema_is_reentrant() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIRROR_SCHEMA).unwrap();
        conn.execute_batch(MIRROR_SCHEMA).unwrap();
    }

    #[test]
    fn test_ml_features_has_36_feature_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIRROR_SCHEMA).unwrap();
        let mut stmt = conn.prepare("PRAGMA table_info(ml_features_v2)").unwrap();
        let features = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|name| name.ok())
            .filter(|name| {
                !["id", "session_id", "signal_id", "created_at"].contains(&name.as_str())
            })
            .count();
        assert_eq!(features, 36);
    }
}
