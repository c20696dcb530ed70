// ABOUTME: Remote execution channel module - how queries reach the operational node
// ABOUTME: SSH for production, direct SQLite file access for mounted volumes and tests

pub mod channel;
pub mod query;
pub mod sqlite_file;
pub mod ssh;

pub use channel::{OutputMode, RemoteQueryChannel};
pub use sqlite_file::SqliteFileChannel;
pub use ssh::{SshChannel, SshEndpoint};
