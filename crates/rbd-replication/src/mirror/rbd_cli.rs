//! Mirror client and journal backed by the `rbd` and `ceph` command-line
//! tools.
//!
//! Every call spawns one process with the request's cluster credentials and
//! a per-command timeout. Processes are killed if the calling future is
//! dropped, so a cancelled handler never leaves a command running.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ReplicationConfig;
use crate::mirror::{
    MirrorClient, MirrorError, MirrorImageState, MirrorInfo, MirrorMode, MirrorStatus, SiteStatus,
};
use crate::params::SchedulingInterval;
use crate::resolver::{ClusterConnection, ImageHandle, ResolveError, VolumeJournal};

const ENOENT_MSG: &str = "No such file or directory";
const LAST_UPDATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Runs `rbd`/`ceph` commands against the cluster named by a connection.
#[derive(Debug, Clone)]
pub struct RbdCli {
    config: Arc<ReplicationConfig>,
}

impl RbdCli {
    /// Creates a runner using the binaries and timeouts from `config`.
    pub fn new(config: Arc<ReplicationConfig>) -> Self {
        Self { config }
    }

    async fn rbd(
        &self,
        conn: &ClusterConnection,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, MirrorError> {
        self.run(&self.config.rbd_binary, conn, args, timeout).await
    }

    async fn run(
        &self,
        binary: &str,
        conn: &ClusterConnection,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, MirrorError> {
        let operation = format!("{} {}", binary, args.join(" "));
        debug!("running {}", operation);

        let mut cmd = Command::new(binary);
        cmd.args(args)
            .arg("--id")
            .arg(&conn.user_id)
            .arg("-m")
            .arg(&conn.monitors)
            .arg(format!("--keyfile={}", conn.key_file.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("{} timed out after {:?}", operation, timeout);
                return Err(MirrorError::Timeout {
                    operation,
                    secs: timeout.as_secs(),
                });
            }
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(&operation, &stderr))
    }
}

/// Maps a failed command's stderr onto the mirror error sentinels.
pub(crate) fn classify_failure(operation: &str, stderr: &str) -> MirrorError {
    let msg = stderr.trim().to_string();
    if msg.contains(ENOENT_MSG) {
        if msg.contains("error opening pool") {
            return MirrorError::PoolNotFound { msg };
        }
        return MirrorError::ImageNotFound { msg };
    }
    if msg.is_empty() {
        return MirrorError::Remote {
            msg: format!("{operation} failed"),
        };
    }
    MirrorError::Remote { msg }
}

#[derive(Debug, Deserialize)]
struct ImageInfoJson {
    #[serde(default)]
    mirroring: Option<MirroringJson>,
}

#[derive(Debug, Deserialize)]
struct MirroringJson {
    state: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
struct ImageStatusJson {
    state: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    last_update: String,
    #[serde(default)]
    peer_sites: Vec<PeerSiteJson>,
}

#[derive(Debug, Deserialize)]
struct PeerSiteJson {
    mirror_uuids: String,
    state: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    last_update: String,
}

#[derive(Debug, Deserialize)]
struct PoolJson {
    pool_id: i64,
    pool_name: String,
}

/// Parses `rbd info --format json`. A missing `mirroring` object means
/// mirroring is disabled.
pub(crate) fn parse_image_info(json: &str) -> Result<MirrorInfo, MirrorError> {
    let info: ImageInfoJson = serde_json::from_str(json).map_err(parse_err)?;
    match info.mirroring {
        None => Ok(MirrorInfo {
            state: MirrorImageState::Disabled,
            primary: false,
        }),
        Some(m) => Ok(MirrorInfo {
            state: m.state.parse()?,
            primary: m.primary,
        }),
    }
}

/// Parses `rbd mirror image status --format json`.
pub(crate) fn parse_image_status(json: &str) -> Result<MirrorStatus, MirrorError> {
    let status: ImageStatusJson = serde_json::from_str(json).map_err(parse_err)?;
    let (up, state) = split_daemon_state(&status.state);
    let local = SiteStatus {
        mirror_uuid: String::new(),
        state,
        up,
        description: status.description,
        last_update: parse_last_update(&status.last_update),
    };
    let peers = status
        .peer_sites
        .into_iter()
        .map(|p| {
            let (up, state) = split_daemon_state(&p.state);
            SiteStatus {
                mirror_uuid: p.mirror_uuids,
                state,
                up,
                description: p.description,
                last_update: parse_last_update(&p.last_update),
            }
        })
        .collect();
    Ok(MirrorStatus::new(local, peers))
}

// "up+replaying" -> (true, "replaying"); "down+stopped" -> (false, "stopped")
fn split_daemon_state(raw: &str) -> (bool, String) {
    match raw.split_once('+') {
        Some((daemon, state)) => (daemon == "up", state.to_string()),
        None => (false, raw.to_string()),
    }
}

fn parse_last_update(raw: &str) -> i64 {
    chrono::NaiveDateTime::parse_from_str(raw, LAST_UPDATE_FORMAT)
        .map(|t| t.and_utc().timestamp())
        .unwrap_or(0)
}

fn parse_err(e: serde_json::Error) -> MirrorError {
    MirrorError::Parse { msg: e.to_string() }
}

#[async_trait]
impl MirrorClient for RbdCli {
    async fn get_mirror_info(&self, image: &ImageHandle) -> Result<MirrorInfo, MirrorError> {
        let spec = image.image_spec();
        let out = self
            .rbd(
                &image.connection,
                &["info", &spec, "--format", "json"],
                self.config.command_timeout(),
            )
            .await?;
        parse_image_info(&out)
    }

    async fn get_mirror_status(&self, image: &ImageHandle) -> Result<MirrorStatus, MirrorError> {
        let spec = image.image_spec();
        let out = self
            .rbd(
                &image.connection,
                &["mirror", "image", "status", &spec, "--format", "json"],
                self.config.command_timeout(),
            )
            .await?;
        parse_image_status(&out)
    }

    async fn enable_mirroring(
        &self,
        image: &ImageHandle,
        mode: MirrorMode,
    ) -> Result<(), MirrorError> {
        let spec = image.image_spec();
        self.rbd(
            &image.connection,
            &["mirror", "image", "enable", &spec, mode.as_str()],
            self.config.command_timeout(),
        )
        .await
        .map(drop)
    }

    async fn disable_mirroring(&self, image: &ImageHandle, force: bool) -> Result<(), MirrorError> {
        let spec = image.image_spec();
        let mut args = vec!["mirror", "image", "disable", spec.as_str()];
        if force {
            args.push("--force");
        }
        self.rbd(&image.connection, &args, self.config.command_timeout())
            .await
            .map(drop)
    }

    async fn promote(&self, image: &ImageHandle, force: bool) -> Result<(), MirrorError> {
        let spec = image.image_spec();
        let mut args = vec!["mirror", "image", "promote", spec.as_str()];
        let timeout = if force {
            args.push("--force");
            self.config.force_promote_timeout()
        } else {
            self.config.command_timeout()
        };
        self.rbd(&image.connection, &args, timeout).await.map(drop)
    }

    async fn demote(&self, image: &ImageHandle) -> Result<(), MirrorError> {
        let spec = image.image_spec();
        self.rbd(
            &image.connection,
            &["mirror", "image", "demote", &spec],
            self.config.command_timeout(),
        )
        .await
        .map(drop)
    }

    async fn resync(&self, image: &ImageHandle) -> Result<(), MirrorError> {
        let spec = image.image_spec();
        self.rbd(
            &image.connection,
            &["mirror", "image", "resync", &spec],
            self.config.command_timeout(),
        )
        .await
        .map(drop)
    }

    async fn add_snapshot_schedule(
        &self,
        image: &ImageHandle,
        interval: &SchedulingInterval,
        start_time: Option<&str>,
    ) -> Result<(), MirrorError> {
        let mut args = vec![
            "mirror",
            "snapshot",
            "schedule",
            "add",
            "--pool",
            image.pool.as_str(),
        ];
        if !image.rados_namespace.is_empty() {
            args.extend(["--namespace", image.rados_namespace.as_str()]);
        }
        args.extend(["--image", image.image_name.as_str(), interval.as_str()]);
        if let Some(start) = start_time {
            args.push(start);
        }
        self.rbd(&image.connection, &args, self.config.command_timeout())
            .await
            .map(drop)
    }
}

#[async_trait]
impl VolumeJournal for RbdCli {
    async fn pool_name(
        &self,
        conn: &ClusterConnection,
        pool_id: i64,
    ) -> Result<String, ResolveError> {
        let out = self
            .run(
                &self.config.ceph_binary,
                conn,
                &["osd", "pool", "ls", "detail", "--format", "json"],
                self.config.command_timeout(),
            )
            .await
            .map_err(|e| ResolveError::Journal { msg: e.to_string() })?;
        let pools: Vec<PoolJson> = serde_json::from_str(&out)
            .map_err(|e| ResolveError::Journal { msg: e.to_string() })?;
        pools
            .into_iter()
            .find(|p| p.pool_id == pool_id)
            .map(|p| p.pool_name)
            .ok_or(ResolveError::PoolNotFound {
                pool: pool_id.to_string(),
            })
    }

    async fn image_name(
        &self,
        conn: &ClusterConnection,
        pool: &str,
        rados_namespace: &str,
        object_uuid: &str,
    ) -> Result<String, ResolveError> {
        let name = format!("{}{}", self.config.volume_name_prefix, object_uuid);
        let spec = if rados_namespace.is_empty() {
            format!("{pool}/{name}")
        } else {
            format!("{pool}/{rados_namespace}/{name}")
        };
        match self
            .rbd(
                conn,
                &["info", &spec, "--format", "json"],
                self.config.command_timeout(),
            )
            .await
        {
            Ok(_) => Ok(name),
            Err(MirrorError::ImageNotFound { .. }) => {
                Err(ResolveError::ImageNotFound { image: spec })
            }
            Err(MirrorError::PoolNotFound { .. }) => Err(ResolveError::PoolNotFound {
                pool: pool.to_string(),
            }),
            Err(e) => Err(ResolveError::Journal { msg: e.to_string() }),
        }
    }
}
