use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{GroupId, Limits, ServerId};
use crate::discovery::{BackoffPolicy, DiscoveryConfig, PeerConfig};
use crate::repl::{ApplyExecutor, InlineExecutor, KeyedExecutor};

use super::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub limits: Limits,
    pub cluster: ClusterConfig,
    pub discovery: MembershipConfig,
    pub apply: ApplyConfig,
}

impl Config {
    pub fn server_id(&self) -> Result<ServerId, ConfigError> {
        ServerId::new(self.cluster.server_name.clone()).map_err(|err| ConfigError::Invalid {
            field: "cluster.server_name",
            reason: err.to_string(),
        })
    }

    /// Peer list for discovery, with this node's own entry left in; discovery
    /// skips it.
    pub fn discovery_config(&self) -> Result<DiscoveryConfig, ConfigError> {
        let local = self.server_id()?;
        let peers = self
            .discovery
            .peers
            .iter()
            .map(|peer| {
                let server =
                    ServerId::new(peer.server.clone()).map_err(|err| ConfigError::Invalid {
                        field: "discovery.peers.server",
                        reason: err.to_string(),
                    })?;
                Ok(PeerConfig {
                    server,
                    addr: peer.addr.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(DiscoveryConfig {
            local,
            peers,
            backoff: self.discovery.backoff(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub server_name: String,
    pub group_id: i32,
    pub data_dir: Option<PathBuf>,
}

impl ClusterConfig {
    pub fn group(&self) -> GroupId {
        GroupId::new(self.group_id)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(crate::paths::data_dir)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            server_name: "server-0".to_string(),
            group_id: GroupId::NULL.get(),
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub server: String,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub peers: Vec<PeerEntry>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl MembershipConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        let base = Duration::from_millis(self.backoff_base_ms);
        let max = Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms));
        BackoffPolicy { base, max }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            backoff_base_ms: 250,
            backoff_max_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Keyed apply lanes; 0 applies inline on the admission thread.
    pub workers: usize,
}

impl ApplyConfig {
    pub fn build_executor(&self) -> std::io::Result<Box<dyn ApplyExecutor>> {
        if self.workers == 0 {
            return Ok(Box::new(InlineExecutor));
        }
        Ok(Box::new(KeyedExecutor::new(self.workers)?))
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Minutely,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
    pub retention_max_age_days: Option<u64>,
    pub retention_max_files: Option<usize>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
            retention_max_age_days: Some(7),
            retention_max_files: Some(10),
        }
    }
}
