//! Mirror status interpretation.
//!
//! Maps raw site status reports onto what the replication handlers need to
//! know: does the image need a resync, and is a resync complete. The live
//! state vocabulary is open-ended, so the checks use substring matching
//! where the daemon is known to decorate its states.

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::mirror::{site_state, MirrorError, MirrorStatus, SiteStatus};

const SPLIT_BRAIN: &str = "split-brain";

/// Errors interpreting a status report.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The report has no local site entry.
    #[error("failed to get local status: {0}")]
    LocalStatus(#[from] MirrorError),

    /// The description carries no usable last-sync timestamp.
    #[error("last sync time not found: {msg}")]
    LastSyncTimeNotFound {
        /// Why it is missing.
        msg: String,
    },

    /// The description's JSON payload is malformed.
    #[error("failed to unmarshal local snapshot info: {0}")]
    MalformedDescription(#[from] serde_json::Error),
}

/// What a resync request should do given the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncAssessment {
    /// The local image is split-brained or in error; issue a resync.
    Resync,
    /// No resync needed; `ready` reports whether the pair is fully synced.
    Syncing {
        /// Both sites report a synced, idle pair.
        ready: bool,
    },
}

/// Returns true if the local image needs a resync.
///
/// Some corner cases (replayer shutdown) leave the state clean but the
/// description diagnostic, so both fields are checked.
pub fn resync_required(local: &SiteStatus) -> bool {
    local.state.contains(site_state::ERROR) || local.description.contains(SPLIT_BRAIN)
}

/// Returns false if any peer is in a known state while its daemon is down.
pub fn remote_ready(status: &MirrorStatus) -> bool {
    let mut ready = true;
    for s in status.peer_statuses() {
        info!(
            "peer site mirrorUUID={:?}, daemon up={}, mirroring state={:?}, description={:?} and lastUpdate={}",
            s.mirror_uuid, s.up, s.state, s.description, s.last_update
        );
        if s.state != site_state::UNKNOWN && !s.up {
            ready = false;
        }
    }
    ready
}

/// Returns true once both sites report an idle, synced pair.
pub fn resync_complete(status: &MirrorStatus) -> Result<bool, StatusError> {
    let local = status.local_status()?;
    Ok(local_synced(local) && remote_ready(status))
}

/// Classifies a status report for the resync handler.
pub fn assess_resync(status: &MirrorStatus) -> Result<ResyncAssessment, StatusError> {
    let local = status.local_status()?;
    info!(
        "local status: daemon up={}, image mirroring state={:?}, description={:?} and lastUpdate={}",
        local.up,
        local.state,
        local.description,
        format_last_update(local.last_update)
    );

    if resync_required(local) {
        return Ok(ResyncAssessment::Resync);
    }
    Ok(ResyncAssessment::Syncing {
        ready: resync_complete(status)?,
    })
}

fn local_synced(local: &SiteStatus) -> bool {
    local.state == site_state::UNKNOWN && local.up
}

fn format_last_update(epoch_secs: i64) -> String {
    chrono::DateTime::from_timestamp(epoch_secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| epoch_secs.to_string())
}

/// First peer site in the report, if any.
pub fn remote_site_status(status: &MirrorStatus) -> Option<&SiteStatus> {
    status.peer_statuses().next()
}

/// Last completed snapshot sync, as reported by the peer site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastSyncInfo {
    /// When the last mirror snapshot was taken, epoch seconds.
    pub last_sync_time: i64,
    /// How long the last snapshot took to sync, in seconds.
    pub last_sync_duration: Option<i64>,
    /// Bytes transferred by the last snapshot sync.
    pub last_sync_bytes: i64,
}

#[derive(Deserialize)]
struct SnapshotSyncReport {
    #[serde(default)]
    local_snapshot_timestamp: i64,
    #[serde(default)]
    last_snapshot_bytes: i64,
    #[serde(default)]
    last_snapshot_sync_seconds: Option<i64>,
}

/// Parses a peer description of the form `replaying, {json}`.
pub fn last_sync_info(description: &str) -> Result<LastSyncInfo, StatusError> {
    if description.is_empty() {
        return Err(StatusError::LastSyncTimeNotFound {
            msg: "empty description".to_string(),
        });
    }
    let Some((_, payload)) = description.split_once(',') else {
        return Err(StatusError::LastSyncTimeNotFound {
            msg: "no snapshot details".to_string(),
        });
    };
    let report: SnapshotSyncReport = serde_json::from_str(payload.trim())?;
    if report.local_snapshot_timestamp == 0 {
        return Err(StatusError::LastSyncTimeNotFound {
            msg: "empty local snapshot timestamp".to_string(),
        });
    }
    Ok(LastSyncInfo {
        last_sync_time: report.local_snapshot_timestamp,
        last_sync_duration: report.last_snapshot_sync_seconds,
        last_sync_bytes: report.last_snapshot_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(uuid: &str, state: &str, up: bool, description: &str) -> SiteStatus {
        SiteStatus {
            mirror_uuid: uuid.to_string(),
            state: state.to_string(),
            up,
            description: description.to_string(),
            last_update: 1_684_675_261,
        }
    }

    #[test]
    fn test_resync_required_on_error_state() {
        assert!(resync_required(&site("", "error", true, "")));
        assert!(resync_required(&site("", "up+error", false, "")));
    }

    #[test]
    fn test_resync_required_on_split_brain_description() {
        assert!(resync_required(&site(
            "",
            "stopped",
            true,
            "split-brain detected"
        )));
    }

    #[test]
    fn test_resync_not_required_when_healthy() {
        assert!(!resync_required(&site("", "replaying", true, "replaying")));
        assert!(!resync_required(&site("", "unknown", true, "")));
    }

    #[test]
    fn test_remote_ready_ignores_unknown_peers() {
        let status = MirrorStatus::new(
            site("", "unknown", true, ""),
            vec![
                site("xyz", "unknown", true, ""),
                site("abc", "unknown", false, ""),
            ],
        );
        assert!(remote_ready(&status));
    }

    #[test]
    fn test_remote_not_ready_when_known_peer_down() {
        let status = MirrorStatus::new(
            site("", "unknown", true, ""),
            vec![
                site("xyz", "unknown", true, ""),
                site("abc", "stopped", false, ""),
            ],
        );
        assert!(!remote_ready(&status));
    }

    #[test]
    fn test_remote_ready_known_peer_up() {
        let status = MirrorStatus::new(
            site("", "unknown", true, ""),
            vec![site("xyz", "replaying", true, "")],
        );
        assert!(remote_ready(&status));
    }

    #[test]
    fn test_remote_ready_without_peers() {
        let status = MirrorStatus::new(site("", "unknown", true, ""), vec![]);
        assert!(remote_ready(&status));
    }

    #[test]
    fn test_resync_complete_requires_local_up_unknown() {
        let peers = vec![site("xyz", "unknown", true, "")];
        let done = MirrorStatus::new(site("", "unknown", true, ""), peers.clone());
        assert!(resync_complete(&done).unwrap());

        let down = MirrorStatus::new(site("", "unknown", false, ""), peers.clone());
        assert!(!resync_complete(&down).unwrap());

        let replaying = MirrorStatus::new(site("", "replaying", true, ""), peers);
        assert!(!resync_complete(&replaying).unwrap());
    }

    #[test]
    fn test_assess_resync() {
        let split = MirrorStatus::new(site("", "error", true, ""), vec![]);
        assert_eq!(assess_resync(&split).unwrap(), ResyncAssessment::Resync);

        let synced = MirrorStatus::new(
            site("", "unknown", true, ""),
            vec![site("xyz", "unknown", true, "")],
        );
        assert_eq!(
            assess_resync(&synced).unwrap(),
            ResyncAssessment::Syncing { ready: true }
        );

        let replaying = MirrorStatus::new(site("", "replaying", true, ""), vec![]);
        assert_eq!(
            assess_resync(&replaying).unwrap(),
            ResyncAssessment::Syncing { ready: false }
        );
    }

    #[test]
    fn test_assess_resync_without_local_status() {
        let status = MirrorStatus {
            site_statuses: vec![site("xyz", "unknown", true, "")],
        };
        assert!(matches!(
            assess_resync(&status),
            Err(StatusError::LocalStatus(_))
        ));
    }

    #[test]
    fn test_remote_site_status_picks_first_peer() {
        let status = MirrorStatus::new(
            site("", "unknown", true, ""),
            vec![site("p1", "replaying", true, ""), site("p2", "stopped", true, "")],
        );
        assert_eq!(remote_site_status(&status).unwrap().mirror_uuid, "p1");
        let lonely = MirrorStatus::new(site("", "unknown", true, ""), vec![]);
        assert!(remote_site_status(&lonely).is_none());
    }

    #[test]
    fn test_last_sync_info_full() {
        let description = r#"replaying, {"bytes_per_second":0.0,"bytes_per_snapshot":81920.0,"last_snapshot_bytes":81920,"last_snapshot_sync_seconds":3,"local_snapshot_timestamp":1684675261,"remote_snapshot_timestamp":1684675261,"replay_state":"idle"}"#;
        let info = last_sync_info(description).unwrap();
        assert_eq!(info.last_sync_time, 1_684_675_261);
        assert_eq!(info.last_sync_bytes, 81_920);
        assert_eq!(info.last_sync_duration, Some(3));
    }

    #[test]
    fn test_last_sync_info_optional_fields() {
        let info = last_sync_info(r#"replaying, {"local_snapshot_timestamp":1684675261}"#).unwrap();
        assert_eq!(info.last_sync_bytes, 0);
        assert_eq!(info.last_sync_duration, None);
    }

    #[test]
    fn test_last_sync_info_missing() {
        assert!(matches!(
            last_sync_info(""),
            Err(StatusError::LastSyncTimeNotFound { .. })
        ));
        assert!(matches!(
            last_sync_info("replaying"),
            Err(StatusError::LastSyncTimeNotFound { .. })
        ));
        assert!(matches!(
            last_sync_info(r#"replaying, {"last_snapshot_bytes":10}"#),
            Err(StatusError::LastSyncTimeNotFound { .. })
        ));
    }

    #[test]
    fn test_last_sync_info_malformed_json() {
        assert!(matches!(
            last_sync_info("replaying, {not json"),
            Err(StatusError::MalformedDescription(_))
        ));
    }
}
