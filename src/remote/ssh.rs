// ABOUTME: SSH-backed RemoteQueryChannel - runs sqlite3 on the operational node
// ABOUTME: Exit 255 or a timeout is a transport failure, any other non-zero exit a query failure

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::channel::{OutputMode, RemoteQueryChannel};
use crate::error::SyncError;
use crate::utils::shell_quote;

/// ssh reserves exit status 255 for its own errors (unreachable host, auth failure).
const SSH_ERROR_EXIT: i32 = 255;

/// Identity of the remote node. Provisioned and rotated outside this crate.
#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub host: String,
    pub user: String,
    pub port: Option<u16>,
    pub key_path: Option<PathBuf>,
}

impl SshEndpoint {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Runs queries as `ssh user@host 'sqlite3 -readonly -batch <db> <query>'`.
pub struct SshChannel {
    endpoint: SshEndpoint,
    remote_db_path: String,
    sqlite_binary: String,
    connect_timeout: Duration,
    command_timeout: Duration,
    ssh_binary: PathBuf,
}

impl SshChannel {
    /// Create a channel, failing early if no `ssh` client is installed.
    pub fn new(
        endpoint: SshEndpoint,
        remote_db_path: impl Into<String>,
        sqlite_binary: impl Into<String>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, SyncError> {
        let ssh_binary = which::which("ssh").map_err(|_| {
            SyncError::Config(
                "ssh client not found in PATH\n\
                 Install OpenSSH (e.g. apt-get install openssh-client) or use transport = \"file\""
                    .to_string(),
            )
        })?;

        Ok(Self {
            endpoint,
            remote_db_path: remote_db_path.into(),
            sqlite_binary: sqlite_binary.into(),
            connect_timeout,
            command_timeout,
            ssh_binary,
        })
    }

    /// The command line executed by the remote login shell.
    pub fn remote_command(&self, query: &str, mode: OutputMode) -> String {
        let mut parts = vec![
            shell_quote(&self.sqlite_binary),
            "-readonly".to_string(),
            "-batch".to_string(),
        ];
        if mode == OutputMode::Json {
            parts.push("-json".to_string());
        }
        parts.push(shell_quote(&self.remote_db_path));
        parts.push(shell_quote(query));
        parts.join(" ")
    }

    /// Arguments passed to the local `ssh` process.
    pub fn ssh_args(&self, query: &str, mode: OutputMode) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(key) = &self.endpoint.key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        if let Some(port) = self.endpoint.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            self.endpoint.destination(),
            self.remote_command(query, mode),
        ]);
        args
    }
}

#[async_trait]
impl RemoteQueryChannel for SshChannel {
    async fn execute(&self, query: &str, mode: OutputMode) -> Result<String, SyncError> {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(self.ssh_args(query, mode))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::trace!("ssh {}: {}", self.endpoint.destination(), query);

        let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Err(_) => {
                return Err(SyncError::Transport(format!(
                    "ssh to {} timed out after {:?}",
                    self.endpoint.host, self.command_timeout
                )))
            }
            Ok(Err(e)) => {
                return Err(SyncError::Transport(format!(
                    "failed to spawn ssh: {}",
                    e
                )))
            }
            Ok(Ok(output)) => output,
        };

        classify_output(output.status.code(), &output.stdout, &output.stderr)
    }

    fn describe(&self) -> String {
        format!(
            "ssh://{}{}:{}",
            self.endpoint.destination(),
            self.endpoint
                .port
                .map(|p| format!(":{}", p))
                .unwrap_or_default(),
            self.remote_db_path
        )
    }
}

/// Map a finished ssh process onto output, transport failure or query failure.
fn classify_output(code: Option<i32>, stdout: &[u8], stderr: &[u8]) -> Result<String, SyncError> {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    match code {
        Some(0) => String::from_utf8(stdout.to_vec())
            .map_err(|e| SyncError::Parse(format!("remote output is not UTF-8: {}", e))),
        Some(SSH_ERROR_EXIT) => Err(SyncError::Transport(if stderr.is_empty() {
            "ssh exited with status 255".to_string()
        } else {
            stderr
        })),
        // Killed by a signal: treat like a dropped connection.
        None => Err(SyncError::Transport(format!(
            "ssh terminated by signal{}",
            if stderr.is_empty() {
                String::new()
            } else {
                format!(": {}", stderr)
            }
        ))),
        Some(status) => Err(SyncError::RemoteQuery {
            status: Some(status),
            message: stderr,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Option<SshChannel> {
        SshChannel::new(
            SshEndpoint {
                host: "10.0.0.5".to_string(),
                user: "ec2-user".to_string(),
                port: Some(2222),
                key_path: Some(PathBuf::from("/keys/trading_monitor")),
            },
            "/srv/trading/data/trading_signals.db",
            "sqlite3",
            Duration::from_secs(10),
            Duration::from_secs(30),
        )
        .ok()
    }

    #[test]
    fn test_remote_command_quotes_query() {
        // Skips on hosts without an ssh client.
        let Some(channel) = channel() else { return };
        let cmd = channel.remote_command(
            "SELECT COUNT(*) FROM \"daily_stats\" WHERE \"date\" > '2024-01-05';",
            OutputMode::List,
        );
        assert_eq!(
            cmd,
            "'sqlite3' -readonly -batch '/srv/trading/data/trading_signals.db' \
             'SELECT COUNT(*) FROM \"daily_stats\" WHERE \"date\" > '\\''2024-01-05'\\'';'"
        );
    }

    #[test]
    fn test_json_mode_flag() {
        let Some(channel) = channel() else { return };
        assert!(channel
            .remote_command("SELECT 1;", OutputMode::Json)
            .contains(" -json "));
        assert!(!channel
            .remote_command("SELECT 1;", OutputMode::List)
            .contains("-json"));
    }

    #[test]
    fn test_ssh_args() {
        let Some(channel) = channel() else { return };
        let args = channel.ssh_args("SELECT 1;", OutputMode::List);
        assert_eq!(&args[..4], ["-i", "/keys/trading_monitor", "-p", "2222"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(args[args.len() - 2], "ec2-user@10.0.0.5");
        assert_eq!(
            channel.describe(),
            "ssh://ec2-user@10.0.0.5:2222:/srv/trading/data/trading_signals.db"
        );
    }

    #[test]
    fn test_classify_success_keeps_empty_output() {
        assert_eq!(classify_output(Some(0), b"", b"").unwrap(), "");
        assert_eq!(classify_output(Some(0), b"7\n", b"").unwrap(), "7\n");
    }

    #[test]
    fn test_classify_ssh_failure_is_transport() {
        let stderr = b"ssh: connect to host 10.0.0.5 port 22: Connection refused";
        let err = classify_output(Some(255), b"", stderr).unwrap_err();
        assert!(err.is_transport());
        assert!(classify_output(None, b"", b"").unwrap_err().is_transport());
    }

    #[test]
    fn test_classify_sqlite_failure_is_remote_query() {
        let err =
            classify_output(Some(1), b"", b"Error: no such table: ml_features_v2").unwrap_err();
        assert_eq!(
            err,
            SyncError::RemoteQuery {
                status: Some(1),
                message: "Error: no such table: ml_features_v2".to_string()
            }
        );
    }
}
