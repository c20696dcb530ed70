// ABOUTME: Fixed registry of monitored tables and their progress cursor types
// ABOUTME: Integer-id tables compare numerically, the date-keyed table compares ISO strings

use crate::error::SyncError;
use crate::utils::quote_literal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Date cursor used before a date-keyed table has ever been synced.
pub const EPOCH_DATE: &str = "1970-01-01";

/// How a table's progress cursor is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorKind {
    /// Auto-increment integer primary key.
    Id,
    /// ISO `YYYY-MM-DD` date column; lexicographic order equals chronological order.
    Date,
}

/// A cursor value: the last key mirrored locally for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorValue {
    Id(i64),
    Date(String),
}

impl CursorValue {
    /// Build a date cursor, rejecting anything that is not a canonical `YYYY-MM-DD` date.
    ///
    /// Canonical form matters: `'2024-1-5' > '2024-01-06'` lexicographically.
    pub fn date(value: &str) -> Result<Self, SyncError> {
        let parsed = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|e| SyncError::Parse(format!("invalid date cursor '{}': {}", value, e)))?;
        if parsed.format("%Y-%m-%d").to_string() != value {
            return Err(SyncError::Parse(format!(
                "date cursor '{}' is not in canonical YYYY-MM-DD form",
                value
            )));
        }
        Ok(CursorValue::Date(value.to_string()))
    }

    pub fn kind(&self) -> CursorKind {
        match self {
            CursorValue::Id(_) => CursorKind::Id,
            CursorValue::Date(_) => CursorKind::Date,
        }
    }

    /// Render as a SQL literal for `WHERE key > <literal>` clauses.
    pub fn to_sql_literal(&self) -> String {
        match self {
            CursorValue::Id(id) => id.to_string(),
            CursorValue::Date(date) => quote_literal(date),
        }
    }
}

/// Cursors of different kinds are incomparable, so `a > b` is false for them.
impl PartialOrd for CursorValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (CursorValue::Id(a), CursorValue::Id(b)) => Some(a.cmp(b)),
            (CursorValue::Date(a), CursorValue::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorValue::Id(id) => write!(f, "{}", id),
            CursorValue::Date(date) => write!(f, "{}", date),
        }
    }
}

/// A remote table mirrored by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredTable {
    pub name: &'static str,
    pub kind: CursorKind,
}

impl MonitoredTable {
    /// Column the cursor is taken from.
    pub fn key_column(&self) -> &'static str {
        match self.kind {
            CursorKind::Id => "id",
            CursorKind::Date => "date",
        }
    }

    /// Cursor for a table that has never been synced.
    pub fn zero_cursor(&self) -> CursorValue {
        match self.kind {
            CursorKind::Id => CursorValue::Id(0),
            CursorKind::Date => CursorValue::Date(EPOCH_DATE.to_string()),
        }
    }
}

/// Every table the mirror tracks, in sync order.
pub const MONITORED_TABLES: &[MonitoredTable] = &[
    MonitoredTable {
        name: "signals_received",
        kind: CursorKind::Id,
    },
    MonitoredTable {
        name: "orders_executed",
        kind: CursorKind::Id,
    },
    MonitoredTable {
        name: "trading_results",
        kind: CursorKind::Id,
    },
    MonitoredTable {
        name: "ml_features_v2",
        kind: CursorKind::Id,
    },
    MonitoredTable {
        name: "ml_signal_quality",
        kind: CursorKind::Id,
    },
    MonitoredTable {
        name: "daily_stats",
        kind: CursorKind::Date,
    },
];

/// Look up a registry entry by table name.
pub fn lookup(name: &str) -> Option<&'static MonitoredTable> {
    MONITORED_TABLES.iter().find(|t| t.name == name)
}
