//! Image mirroring data model and the client trait for the remote mirror
//! control surface.
//!
//! Two state vocabularies coexist: [`MirrorImageState`] is the configured
//! mirroring state of an image, while [`SiteStatus::state`] is the live,
//! open-ended status string reported by the mirror daemon.

pub mod rbd_cli;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::SchedulingInterval;
use crate::resolver::ImageHandle;

pub use rbd_cli::RbdCli;

/// Live status strings reported by the mirror daemon.
pub mod site_state {
    /// No known state; on a fully synced pair both sites report this.
    pub const UNKNOWN: &str = "unknown";
    /// Mirroring failed for the image.
    pub const ERROR: &str = "error";
    /// Secondary is replaying snapshots from the primary.
    pub const REPLAYING: &str = "replaying";
}

/// Mirroring mode. Only snapshot-based mirroring is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorMode {
    /// Propagate images between clusters through periodic mirror snapshots.
    Snapshot,
}

impl MirrorMode {
    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorMode::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for MirrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a mirroring mode string is not supported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported mirroring mode {0:?}")]
pub struct UnsupportedMirrorMode(pub String);

impl FromStr for MirrorMode {
    type Err = UnsupportedMirrorMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapshot" => Ok(MirrorMode::Snapshot),
            other => Err(UnsupportedMirrorMode(other.to_string())),
        }
    }
}

/// Configured mirroring state of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorImageState {
    /// Mirroring is off.
    Disabled,
    /// Mirroring is being switched on.
    Enabling,
    /// Mirroring is on.
    Enabled,
    /// Mirroring is being switched off; callers should retry.
    Disabling,
}

impl MirrorImageState {
    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorImageState::Disabled => "disabled",
            MirrorImageState::Enabling => "enabling",
            MirrorImageState::Enabled => "enabled",
            MirrorImageState::Disabling => "disabling",
        }
    }
}

impl fmt::Display for MirrorImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MirrorImageState {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(MirrorImageState::Disabled),
            "enabling" => Ok(MirrorImageState::Enabling),
            "enabled" => Ok(MirrorImageState::Enabled),
            "disabling" => Ok(MirrorImageState::Disabling),
            other => Err(MirrorError::Parse {
                msg: format!("unknown mirror image state {other:?}"),
            }),
        }
    }
}

/// Snapshot of an image's mirror configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorInfo {
    /// Configured mirroring state.
    pub state: MirrorImageState,
    /// Whether this cluster holds the primary role for the image.
    pub primary: bool,
}

/// Mirror status of one site.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SiteStatus {
    /// Peer mirror UUID; empty for the local site.
    pub mirror_uuid: String,
    /// Free-form daemon state (`unknown`, `error`, `replaying`, ...).
    pub state: String,
    /// Whether the mirror daemon for this site is up.
    pub up: bool,
    /// Free-form description; may mention `split-brain`.
    pub description: String,
    /// Last status update, epoch seconds.
    pub last_update: i64,
}

impl SiteStatus {
    /// Returns true if this entry describes the local site.
    pub fn is_local(&self) -> bool {
        self.mirror_uuid.is_empty()
    }
}

/// Mirror status of an image across all sites.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MirrorStatus {
    /// One entry per site; the local site has an empty mirror UUID.
    pub site_statuses: Vec<SiteStatus>,
}

impl MirrorStatus {
    /// Builds a status from the local entry and its peers.
    pub fn new(local: SiteStatus, peers: Vec<SiteStatus>) -> Self {
        let mut site_statuses = Vec::with_capacity(peers.len() + 1);
        site_statuses.push(local);
        site_statuses.extend(peers);
        Self { site_statuses }
    }

    /// Status reported for the local site.
    pub fn local_status(&self) -> Result<&SiteStatus, MirrorError> {
        self.site_statuses
            .iter()
            .find(|s| s.is_local())
            .ok_or(MirrorError::LocalStatusMissing)
    }

    /// Statuses reported for peer sites.
    pub fn peer_statuses(&self) -> impl Iterator<Item = &SiteStatus> {
        self.site_statuses.iter().filter(|s| !s.is_local())
    }
}

/// Errors from the mirror control surface.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Image does not exist.
    #[error("image not found: {msg}")]
    ImageNotFound {
        /// Remote diagnostic.
        msg: String,
    },

    /// Pool does not exist.
    #[error("pool not found: {msg}")]
    PoolNotFound {
        /// Remote diagnostic.
        msg: String,
    },

    /// Status report carried no entry for the local site.
    #[error("local site status not found")]
    LocalStatusMissing,

    /// Remote call did not finish in time.
    #[error("{operation} timed out after {secs}s")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Timeout that elapsed.
        secs: u64,
    },

    /// Remote rejected the call.
    #[error("{msg}")]
    Remote {
        /// Remote diagnostic.
        msg: String,
    },

    /// Remote output could not be understood.
    #[error("failed to parse mirror response: {msg}")]
    Parse {
        /// What went wrong.
        msg: String,
    },

    /// Local I/O failure talking to the remote.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Returns true if the remote refused because the image is busy, which
    /// for promotion means the peer could not be reached to demote.
    pub fn is_busy(&self) -> bool {
        self.to_string().contains("Device or resource busy")
    }

    /// Returns true for the image-not-found sentinel.
    pub fn is_image_not_found(&self) -> bool {
        matches!(self, MirrorError::ImageNotFound { .. })
    }
}

/// Driver-side binding to the remote cluster's mirror control surface.
///
/// Each call may block on the remote for an arbitrary time; dropping the
/// returned future must abandon the call.
#[async_trait]
pub trait MirrorClient: Send + Sync + 'static {
    /// Fetch the configured mirroring state of the image.
    async fn get_mirror_info(&self, image: &ImageHandle) -> Result<MirrorInfo, MirrorError>;

    /// Fetch live mirror status for the local and peer sites.
    async fn get_mirror_status(&self, image: &ImageHandle) -> Result<MirrorStatus, MirrorError>;

    /// Enable mirroring with the given mode.
    async fn enable_mirroring(&self, image: &ImageHandle, mode: MirrorMode)
        -> Result<(), MirrorError>;

    /// Disable mirroring.
    async fn disable_mirroring(&self, image: &ImageHandle, force: bool)
        -> Result<(), MirrorError>;

    /// Promote the image to primary; `force` allows it while the peer is unreachable.
    async fn promote(&self, image: &ImageHandle, force: bool) -> Result<(), MirrorError>;

    /// Demote the image to secondary.
    async fn demote(&self, image: &ImageHandle) -> Result<(), MirrorError>;

    /// Discard the local image and rebuild it from the primary.
    async fn resync(&self, image: &ImageHandle) -> Result<(), MirrorError>;

    /// Add a mirror snapshot schedule for the image.
    async fn add_snapshot_schedule(
        &self,
        image: &ImageHandle,
        interval: &SchedulingInterval,
        start_time: Option<&str>,
    ) -> Result<(), MirrorError>;
}
