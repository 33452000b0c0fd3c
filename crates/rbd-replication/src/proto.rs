//! Replication RPC messages.
//!
//! Field numbers follow the csi-addons `replication.proto` definitions so
//! the messages are wire compatible with the sidecar.

use std::collections::HashMap;

/// Request to enable mirroring of a volume.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnableVolumeReplicationRequest {
    /// Volume to operate on. REQUIRED.
    #[prost(string, tag = "1")]
    pub volume_id: String,
    /// `mirroringMode`, `schedulingInterval` and `schedulingStartTime`.
    #[prost(map = "string, string", tag = "2")]
    pub parameters: HashMap<String, String>,
    /// Cluster credentials (`userID`, `userKey`).
    #[prost(map = "string, string", tag = "3")]
    pub secrets: HashMap<String, String>,
}
/// Intentionally empty.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnableVolumeReplicationResponse {}

/// Request to disable mirroring of a volume.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisableVolumeReplicationRequest {
    /// Volume to operate on. REQUIRED.
    #[prost(string, tag = "1")]
    pub volume_id: String,
    /// `force` is honoured.
    #[prost(map = "string, string", tag = "2")]
    pub parameters: HashMap<String, String>,
    /// Cluster credentials (`userID`, `userKey`).
    #[prost(map = "string, string", tag = "3")]
    pub secrets: HashMap<String, String>,
}
/// Intentionally empty.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisableVolumeReplicationResponse {}

/// Request to make the local image primary.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PromoteVolumeRequest {
    /// Volume to operate on. REQUIRED.
    #[prost(string, tag = "1")]
    pub volume_id: String,
    /// Promote even if the peer cannot be demoted.
    #[prost(bool, tag = "2")]
    pub force: bool,
    /// `schedulingInterval` and `schedulingStartTime` are honoured.
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
    /// Cluster credentials (`userID`, `userKey`).
    #[prost(map = "string, string", tag = "4")]
    pub secrets: HashMap<String, String>,
}
/// Intentionally empty.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PromoteVolumeResponse {}

/// Request to make the local image secondary.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DemoteVolumeRequest {
    /// Volume to operate on. REQUIRED.
    #[prost(string, tag = "1")]
    pub volume_id: String,
    /// Unused.
    #[prost(bool, tag = "2")]
    pub force: bool,
    /// Unused.
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
    /// Cluster credentials (`userID`, `userKey`).
    #[prost(map = "string, string", tag = "4")]
    pub secrets: HashMap<String, String>,
}
/// Intentionally empty.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DemoteVolumeResponse {}

/// Request to resync a secondary image from the primary.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResyncVolumeRequest {
    /// Volume to operate on. REQUIRED.
    #[prost(string, tag = "1")]
    pub volume_id: String,
    /// Unused.
    #[prost(bool, tag = "2")]
    pub force: bool,
    /// Unused.
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
    /// Cluster credentials (`userID`, `userKey`).
    #[prost(map = "string, string", tag = "4")]
    pub secrets: HashMap<String, String>,
}
/// Outcome of a resync request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResyncVolumeResponse {
    /// Both sites report a fully synced pair.
    #[prost(bool, tag = "1")]
    pub ready: bool,
}

/// Request for the last completed sync of a primary image.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetVolumeReplicationInfoRequest {
    /// Volume to operate on. REQUIRED.
    #[prost(string, tag = "1")]
    pub volume_id: String,
    /// Cluster credentials (`userID`, `userKey`).
    #[prost(map = "string, string", tag = "2")]
    pub secrets: HashMap<String, String>,
}
/// Last completed sync as reported by the peer.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetVolumeReplicationInfoResponse {
    /// When the last synced snapshot was taken.
    #[prost(message, optional, tag = "1")]
    pub last_sync_time: Option<::prost_types::Timestamp>,
    /// How long the last sync took, when reported.
    #[prost(message, optional, tag = "2")]
    pub last_sync_duration: Option<::prost_types::Duration>,
    /// Bytes transferred by the last sync.
    #[prost(int64, tag = "3")]
    pub last_sync_bytes: i64,
}
