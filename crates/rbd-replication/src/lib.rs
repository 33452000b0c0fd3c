#![warn(missing_docs)]

//! RBD CSI replication subsystem: per-volume mirroring control (enable, disable, promote, demote, resync)

pub mod config;
pub mod credentials;
pub mod error;
pub mod mirror;
pub mod params;
pub mod proto;
pub mod resolver;
pub mod server;
pub mod status;
pub mod volume_id;
pub mod volume_locks;

pub use config::ReplicationConfig;
pub use error::{ReplError, Result};
pub use mirror::{
    MirrorClient, MirrorError, MirrorImageState, MirrorInfo, MirrorMode, MirrorStatus, RbdCli,
    SiteStatus,
};
pub use resolver::{ImageHandle, ImageResolver, ResolveError};
pub use server::ReplicationServer;
pub use volume_locks::VolumeLocks;
