// ABOUTME: Local mirror module - table registry, typed records and the mirror database
// ABOUTME: Everything the sync engine needs to place and apply fetched rows locally

pub mod record;
pub mod schema;
pub mod store;
pub mod tables;

pub use record::{parse_json_rows, FieldValue, Record};
pub use store::{database_size, ApplyOutcome, MirrorStore};
pub use tables::{lookup, CursorKind, CursorValue, MonitoredTable, EPOCH_DATE, MONITORED_TABLES};
