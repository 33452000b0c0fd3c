//! Replication service configuration.
//!
//! Loaded once at startup and shared read-only (`Arc<ReplicationConfig>`)
//! by every handler.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The TOML is malformed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {msg}")]
    Invalid {
        /// What is wrong.
        msg: String,
    },
}

/// One Ceph cluster this instance serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Cluster ID embedded in volume IDs.
    pub cluster_id: String,
    /// Monitor addresses.
    pub monitors: Vec<String>,
    /// RADOS namespace images live in; empty for the default.
    #[serde(default)]
    pub rados_namespace: String,
}

/// Immutable configuration record threaded through handler construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Instance ID; journal names are derived from it.
    pub instance_id: String,
    /// `rbd` executable.
    pub rbd_binary: String,
    /// `ceph` executable.
    pub ceph_binary: String,
    /// Timeout for a single remote command, in seconds.
    pub command_timeout_secs: u64,
    /// Timeout for forced promotion, in seconds.
    pub force_promote_timeout_secs: u64,
    /// Prefix of image names created for volumes.
    pub volume_name_prefix: String,
    /// Directory for per-request key files; system temp dir when unset.
    pub key_dir: Option<PathBuf>,
    /// Clusters served by this instance.
    pub clusters: Vec<ClusterInfo>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            instance_id: "default".to_string(),
            rbd_binary: "rbd".to_string(),
            ceph_binary: "ceph".to_string(),
            command_timeout_secs: 60,
            // Stays under the 2.5 minute replication RPC deadline.
            force_promote_timeout_secs: 120,
            volume_name_prefix: "csi-vol-".to_string(),
            key_dir: None,
            clusters: Vec::new(),
        }
    }
}

impl ReplicationConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Checks value ranges and cluster uniqueness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_id.is_empty() {
            return invalid("instance_id must not be empty");
        }
        if self.rbd_binary.is_empty() || self.ceph_binary.is_empty() {
            return invalid("rbd_binary and ceph_binary must not be empty");
        }
        if self.command_timeout_secs == 0 || self.force_promote_timeout_secs == 0 {
            return invalid("timeouts must be greater than zero");
        }
        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            if cluster.monitors.is_empty() {
                return invalid(&format!("cluster {} has no monitors", cluster.cluster_id));
            }
            if !seen.insert(cluster.cluster_id.as_str()) {
                return invalid(&format!("duplicate cluster {}", cluster.cluster_id));
            }
        }
        Ok(())
    }

    /// Looks up a configured cluster.
    pub fn cluster(&self, cluster_id: &str) -> Option<&ClusterInfo> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }

    /// Timeout for ordinary remote commands.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Timeout for forced promotion.
    pub fn force_promote_timeout(&self) -> Duration {
        Duration::from_secs(self.force_promote_timeout_secs)
    }
}

fn invalid(msg: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid {
        msg: msg.to_string(),
    })
}
