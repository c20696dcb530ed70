// ABOUTME: Library root for signal-mirror
// ABOUTME: Incremental mirroring of append-only trading tables from a remote SQLite node

pub mod config;
pub mod error;
pub mod mirror;
pub mod remote;
pub mod sync;
pub mod utils;

pub use error::SyncError;
