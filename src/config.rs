// ABOUTME: TOML configuration for the mirror - remote endpoint, local paths, sync tuning
// ABOUTME: Missing file means defaults; validate() catches settings that cannot work

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::remote::{RemoteQueryChannel, SqliteFileChannel, SshChannel, SshEndpoint};
use crate::sync::SyncStateStore;
use crate::utils::expand_home;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "signal-mirror.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ssh,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub transport: TransportKind,
    pub host: Option<String>,
    pub user: String,
    pub port: Option<u16>,
    /// Private key for ssh; `~` is expanded.
    pub key_path: Option<PathBuf>,
    /// Database path on the remote node (or the reachable file for `transport = "file"`).
    pub db_path: Option<String>,
    pub sqlite_binary: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Ssh,
            host: None,
            user: "ec2-user".to_string(),
            port: None,
            key_path: None,
            db_path: None,
            sqlite_binary: "sqlite3".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub db_path: PathBuf,
    pub state_path: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/trading_signals.db"),
            state_path: SyncStateStore::default_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Rows per remote read.
    pub page_size: usize,
    /// Seconds between daemon cycles.
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub sync: SyncSettings,
}

impl MirrorConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Settings needed by commands that talk to the remote.
    pub fn validate(&self) -> Result<()> {
        let remote = &self.remote;
        if remote.db_path.as_deref().map_or(true, |p| p.trim().is_empty()) {
            bail!("[remote] db_path is required");
        }
        if remote.transport == TransportKind::Ssh
            && remote.host.as_deref().map_or(true, |h| h.trim().is_empty())
        {
            bail!("[remote] host is required when transport = \"ssh\"");
        }
        if remote.connect_timeout_secs == 0 || remote.command_timeout_secs == 0 {
            bail!("[remote] timeouts must be at least one second");
        }
        if self.sync.page_size == 0 {
            bail!("[sync] page_size must be greater than zero");
        }
        if self.sync.interval_secs == 0 {
            bail!("[sync] interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Build the remote channel described by `[remote]`.
    pub fn build_channel(&self) -> Result<Arc<dyn RemoteQueryChannel>> {
        self.validate()?;
        let remote = &self.remote;
        let db_path = remote.db_path.clone().unwrap_or_default();

        match remote.transport {
            TransportKind::File => {
                let channel = SqliteFileChannel::new(expand_home(Path::new(&db_path)))
                    .with_timeout(Duration::from_secs(remote.command_timeout_secs));
                Ok(Arc::new(channel))
            }
            TransportKind::Ssh => {
                let endpoint = SshEndpoint {
                    host: remote.host.clone().unwrap_or_default(),
                    user: remote.user.clone(),
                    port: remote.port,
                    key_path: remote.key_path.as_deref().map(expand_home),
                };
                let channel = SshChannel::new(
                    endpoint,
                    db_path,
                    remote.sqlite_binary.clone(),
                    Duration::from_secs(remote.connect_timeout_secs),
                    Duration::from_secs(remote.command_timeout_secs),
                )?;
                Ok(Arc::new(channel))
            }
        }
    }
}
