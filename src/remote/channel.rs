// ABOUTME: RemoteQueryChannel trait - the seam between sync logic and the remote node
// ABOUTME: Implementations run one read-only query and return its plain-text output

use async_trait::async_trait;

use crate::error::SyncError;

/// Output shape requested from the remote `sqlite3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One row per line, columns separated by `|`, NULL as empty text.
    List,
    /// A JSON array of row objects; empty output for zero rows.
    Json,
}

/// Executes read-only SQL against the operational node's relational store.
///
/// Implementations must keep three outcomes apart: successful output (possibly
/// empty), [`SyncError::Transport`] when the channel itself failed or timed out,
/// and [`SyncError::RemoteQuery`] when the query ran and exited non-zero.
/// Folding a failure into empty output would make an outage look like "no changes".
#[async_trait]
pub trait RemoteQueryChannel: Send + Sync {
    async fn execute(&self, query: &str, mode: OutputMode) -> Result<String, SyncError>;

    /// Human-readable endpoint description for logs and status output.
    fn describe(&self) -> String;
}
