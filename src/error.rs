// ABOUTME: Error taxonomy for the incremental sync subsystem
// ABOUTME: Separates transport outages from remote query, parse, persist and apply failures

use thiserror::Error;

/// Errors raised while detecting, fetching, applying or persisting a table delta.
///
/// The variants carry rendered messages rather than source errors so a failure
/// can be cloned into per-table cycle results and reported more than once.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// The remote channel could not be reached, was refused, or timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote command ran but exited non-zero (bad query, missing table, locked db).
    #[error("remote query failed{}: {message}", exit_suffix(.status))]
    RemoteQuery { status: Option<i32>, message: String },

    /// The remote answered with something we cannot interpret.
    #[error("unexpected remote response: {0}")]
    Parse(String),

    /// The durable sync state could not be written.
    #[error("failed to persist sync state: {0}")]
    Persist(String),

    /// Some pages of a delta were applied before a later page failed.
    #[error("applied {applied} rows before failing: {reason}")]
    PartialApply { applied: u64, reason: String },

    /// The local mirror database rejected an operation.
    #[error("local mirror error: {0}")]
    Mirror(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn exit_suffix(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" (exit status {})", code),
        None => String::new(),
    }
}

impl SyncError {
    /// True for failures of the channel itself rather than of the query it carried.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

/// Reports serialize errors as their display text.
impl serde::Serialize for SyncError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Mirror(err.to_string())
    }
}
