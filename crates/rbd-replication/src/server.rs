//! Replication RPC handlers.
//!
//! Every handler runs the same prologue (validate the volume ID, build
//! credentials, take the volume lock, resolve the image) and then drives the
//! mirror client. The prologue yields a [`Session`] that owns the scoped
//! resources, so they are released on every exit path: success, error,
//! cancellation or unwind.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use crate::config::ReplicationConfig;
use crate::credentials::Credentials;
use crate::error::{ReplError, Result};
use crate::mirror::{site_state, MirrorClient, MirrorError, MirrorImageState, MirrorInfo};
use crate::params::{self, SchedulingInterval, SchedulingSpec};
use crate::proto::{
    DemoteVolumeRequest, DemoteVolumeResponse, DisableVolumeReplicationRequest,
    DisableVolumeReplicationResponse, EnableVolumeReplicationRequest,
    EnableVolumeReplicationResponse, GetVolumeReplicationInfoRequest,
    GetVolumeReplicationInfoResponse, PromoteVolumeRequest, PromoteVolumeResponse,
    ResyncVolumeRequest, ResyncVolumeResponse,
};
use crate::resolver::{ImageHandle, ImageResolver, ResolveError};
use crate::status::{self, ResyncAssessment, StatusError};
use crate::volume_locks::{VolumeLockGuard, VolumeLocks};

const SPLIT_BRAIN_RESYNC_MSG: &str = "awaiting initial resync due to split brain";

/// Scoped resources of one request. Fields drop in declaration order: the
/// image is closed before the lock is released, credentials go last.
struct Session<'a> {
    image: ImageHandle,
    _lock: VolumeLockGuard<'a>,
    _credentials: Credentials,
}

/// Replication controller service.
pub struct ReplicationServer {
    config: Arc<ReplicationConfig>,
    locks: Arc<VolumeLocks>,
    resolver: Arc<dyn ImageResolver>,
    mirror: Arc<dyn MirrorClient>,
}

impl ReplicationServer {
    /// Creates a server over the given collaborators.
    pub fn new(
        config: Arc<ReplicationConfig>,
        locks: Arc<VolumeLocks>,
        resolver: Arc<dyn ImageResolver>,
        mirror: Arc<dyn MirrorClient>,
    ) -> Self {
        info!(
            "replication server ready for instance {} ({} clusters)",
            config.instance_id,
            config.clusters.len()
        );
        Self {
            config,
            locks,
            resolver,
            mirror,
        }
    }

    /// Enables mirroring and, when requested, adds a snapshot schedule.
    pub async fn enable_volume_replication(
        &self,
        request: Request<EnableVolumeReplicationRequest>,
    ) -> std::result::Result<Response<EnableVolumeReplicationResponse>, Status> {
        let token = cancellation_token(&request);
        let req = request.into_inner();
        respond(with_cancellation(token, self.enable(req)).await)
    }

    /// Disables mirroring on a primary; a replaying secondary is left alone.
    pub async fn disable_volume_replication(
        &self,
        request: Request<DisableVolumeReplicationRequest>,
    ) -> std::result::Result<Response<DisableVolumeReplicationResponse>, Status> {
        let token = cancellation_token(&request);
        let req = request.into_inner();
        respond(with_cancellation(token, self.disable(req)).await)
    }

    /// Promotes a secondary image to primary.
    pub async fn promote_volume(
        &self,
        request: Request<PromoteVolumeRequest>,
    ) -> std::result::Result<Response<PromoteVolumeResponse>, Status> {
        let token = cancellation_token(&request);
        let req = request.into_inner();
        respond(with_cancellation(token, self.promote(req)).await)
    }

    /// Demotes a primary image to secondary.
    pub async fn demote_volume(
        &self,
        request: Request<DemoteVolumeRequest>,
    ) -> std::result::Result<Response<DemoteVolumeResponse>, Status> {
        let token = cancellation_token(&request);
        let req = request.into_inner();
        respond(with_cancellation(token, self.demote(req)).await)
    }

    /// Resyncs a split-brained secondary, or reports whether it is synced.
    pub async fn resync_volume(
        &self,
        request: Request<ResyncVolumeRequest>,
    ) -> std::result::Result<Response<ResyncVolumeResponse>, Status> {
        let token = cancellation_token(&request);
        let req = request.into_inner();
        respond(with_cancellation(token, self.resync(req)).await)
    }

    /// Reports the last completed snapshot sync of a primary image.
    pub async fn get_volume_replication_info(
        &self,
        request: Request<GetVolumeReplicationInfoRequest>,
    ) -> std::result::Result<Response<GetVolumeReplicationInfoResponse>, Status> {
        let token = cancellation_token(&request);
        let req = request.into_inner();
        respond(with_cancellation(token, self.replication_info(req)).await)
    }

    async fn open_session(
        &self,
        volume_id: &str,
        secrets: &HashMap<String, String>,
    ) -> Result<Session<'_>> {
        if volume_id.is_empty() {
            return Err(ReplError::validation("empty volume ID in request"));
        }

        let credentials = Credentials::from_user_secrets(secrets, self.config.key_dir.as_deref())
            .map_err(|e| log_err(ReplError::internal(e.to_string())))?;

        let lock = self.locks.lock(volume_id).ok_or_else(|| {
            log_err(ReplError::Contention {
                volume_id: volume_id.to_string(),
            })
        })?;

        let image = self
            .resolver
            .resolve(volume_id, &credentials, secrets)
            .await
            .map_err(|e| {
                log_err(match e {
                    ResolveError::ImageNotFound { .. } => {
                        ReplError::not_found(format!("volume {volume_id} not found"))
                    }
                    ResolveError::PoolNotFound { pool } => {
                        ReplError::not_found(format!("pool {pool} not found for {volume_id}"))
                    }
                    other => ReplError::internal(other.to_string()),
                })
            })?;

        Ok(Session {
            image,
            _lock: lock,
            _credentials: credentials,
        })
    }

    async fn mirror_info(&self, image: &ImageHandle) -> Result<MirrorInfo> {
        self.mirror
            .get_mirror_info(image)
            .await
            .map_err(|e| log_err(ReplError::internal(e.to_string())))
    }

    async fn add_schedule(
        &self,
        image: &ImageHandle,
        interval: &SchedulingInterval,
        start_time: Option<&str>,
    ) -> Result<()> {
        self.mirror
            .add_snapshot_schedule(image, interval, start_time)
            .await
            .map_err(|e| log_err(ReplError::internal(e.to_string())))?;
        debug!(
            "added scheduling at interval {}, start time {:?} for volume {}",
            interval, start_time, image
        );
        Ok(())
    }

    async fn enable(
        &self,
        req: EnableVolumeReplicationRequest,
    ) -> Result<EnableVolumeReplicationResponse> {
        let session = self.open_session(&req.volume_id, &req.secrets).await?;
        let image = &session.image;

        // Scheduling first: a non-snapshot mode reports the scheduling error.
        let SchedulingSpec {
            interval,
            start_time,
        } = params::parse_scheduling(&req.parameters)?;
        let mode = params::parse_mirror_mode(&req.parameters)?;

        let info = self.mirror_info(image).await?;
        if info.state != MirrorImageState::Enabled {
            self.mirror
                .enable_mirroring(image, mode)
                .await
                .map_err(|e| log_err(ReplError::internal(e.to_string())))?;
            info!("enabled {} mirroring on {}", mode, image);
        }

        if let Some(interval) = interval {
            self.add_schedule(image, &interval, start_time.as_deref())
                .await?;
        }

        Ok(EnableVolumeReplicationResponse {})
    }

    async fn disable(
        &self,
        req: DisableVolumeReplicationRequest,
    ) -> Result<DisableVolumeReplicationResponse> {
        let session = self.open_session(&req.volume_id, &req.secrets).await?;
        let image = &session.image;
        let volume_id = req.volume_id.as_str();

        let force = params::parse_force(&req.parameters)?;
        let info = self.mirror_info(image).await?;

        match info.state {
            MirrorImageState::Disabled => return Ok(DisableVolumeReplicationResponse {}),
            MirrorImageState::Disabling => {
                return Err(ReplError::transitional(format!(
                    "{volume_id} is in disabling state"
                )))
            }
            MirrorImageState::Enabled => {}
            other => {
                return Err(ReplError::validation(format!(
                    "image is in {other} Mode"
                )))
            }
        }

        if !info.primary {
            let mirror_status = self
                .mirror
                .get_mirror_status(image)
                .await
                .map_err(|e| log_err(ReplError::internal(e.to_string())))?;
            let local = mirror_status
                .local_status()
                .map_err(|e| log_err(ReplError::internal(e.to_string())))?;

            // The secondary goes away on its own once the primary is disabled.
            if local.up && local.state == site_state::REPLAYING {
                return Ok(DisableVolumeReplicationResponse {});
            }
            if force {
                warn!(
                    "force disable requested on secondary {}, refusing while not replaying",
                    image
                );
            }
            return Err(log_err(ReplError::validation(format!(
                "secondary image status is up={} and state={}",
                local.up, local.state
            ))));
        }

        self.mirror
            .disable_mirroring(image, force)
            .await
            .map_err(|e| log_err(ReplError::internal(e.to_string())))?;

        let info = self.mirror_info(image).await?;
        if info.state == MirrorImageState::Disabling {
            return Err(ReplError::transitional(format!(
                "{volume_id} is in disabling state"
            )));
        }
        info!("disabled mirroring on {}", image);

        Ok(DisableVolumeReplicationResponse {})
    }

    async fn promote(&self, req: PromoteVolumeRequest) -> Result<PromoteVolumeResponse> {
        let session = self.open_session(&req.volume_id, &req.secrets).await?;
        let image = &session.image;

        let SchedulingSpec {
            interval,
            start_time,
        } = params::parse_scheduling(&req.parameters)?;

        let info = self.mirror_info(image).await?;
        if info.state != MirrorImageState::Enabled {
            return Err(ReplError::validation(format!(
                "mirroring is not enabled on {}, image is in {} Mode",
                req.volume_id, info.state
            )));
        }

        if !info.primary {
            if let Err(e) = self.mirror.promote(image, req.force).await {
                // The peer could not be demoted (site down); the caller
                // retries with force.
                if e.is_busy() {
                    return Err(log_err(ReplError::PreconditionRequiresForce {
                        msg: e.to_string(),
                    }));
                }
                return Err(log_err(ReplError::internal(e.to_string())));
            }
            info!("promoted {} (force={})", image, req.force);
        }

        if let Some(interval) = interval {
            self.add_schedule(image, &interval, start_time.as_deref())
                .await?;
        }

        Ok(PromoteVolumeResponse {})
    }

    async fn demote(&self, req: DemoteVolumeRequest) -> Result<DemoteVolumeResponse> {
        let session = self.open_session(&req.volume_id, &req.secrets).await?;
        let image = &session.image;

        let info = self.mirror_info(image).await?;
        if info.state != MirrorImageState::Enabled {
            return Err(ReplError::validation(format!(
                "mirroring is not enabled on {}, image is in {} Mode",
                req.volume_id, info.state
            )));
        }

        if info.primary {
            self.mirror
                .demote(image)
                .await
                .map_err(|e| log_err(ReplError::internal(e.to_string())))?;
            info!("demoted {}", image);
        }

        Ok(DemoteVolumeResponse {})
    }

    async fn resync(&self, req: ResyncVolumeRequest) -> Result<ResyncVolumeResponse> {
        let session = self.open_session(&req.volume_id, &req.secrets).await?;
        let image = &session.image;

        // The image may have been recreated under us; let the caller retry.
        let info = self.mirror.get_mirror_info(image).await.map_err(|e| {
            log_err(ReplError::transitional(e.to_string()))
        })?;
        check_secondary(&info)?;

        let mirror_status = self
            .mirror
            .get_mirror_status(image)
            .await
            .map_err(status_fetch_error)?;

        let assessment = status::assess_resync(&mirror_status)
            .map_err(|e| log_err(ReplError::internal(e.to_string())))?;

        match assessment {
            ResyncAssessment::Resync => {
                self.mirror.resync(image).await.map_err(|e| {
                    log_err(ReplError::internal(format!(
                        "failed to resync Image ID: {e}"
                    )))
                })?;
                info!("issued resync for {}", image);
                Err(ReplError::AwaitingResync {
                    msg: SPLIT_BRAIN_RESYNC_MSG.to_string(),
                })
            }
            ResyncAssessment::Syncing { ready } => Ok(ResyncVolumeResponse { ready }),
        }
    }

    async fn replication_info(
        &self,
        req: GetVolumeReplicationInfoRequest,
    ) -> Result<GetVolumeReplicationInfoResponse> {
        let session = self.open_session(&req.volume_id, &req.secrets).await?;
        let image = &session.image;

        let info = self.mirror.get_mirror_info(image).await.map_err(|e| {
            log_err(ReplError::transitional(e.to_string()))
        })?;
        if info.state != MirrorImageState::Enabled {
            return Err(ReplError::validation("image mirroring is not enabled"));
        }
        if !info.primary {
            return Err(ReplError::validation("image is not in primary state"));
        }

        let mirror_status = self
            .mirror
            .get_mirror_status(image)
            .await
            .map_err(status_fetch_error)?;

        let remote = status::remote_site_status(&mirror_status).ok_or_else(|| {
            log_err(ReplError::internal(
                "failed to get remote status: remote site status not found",
            ))
        })?;

        let last_sync = status::last_sync_info(&remote.description).map_err(|e| match e {
            StatusError::LastSyncTimeNotFound { .. } => {
                ReplError::not_found(format!("failed to get last sync info: {e}"))
            }
            other => log_err(ReplError::internal(format!(
                "failed to get last sync info: {other}"
            ))),
        })?;

        Ok(GetVolumeReplicationInfoResponse {
            last_sync_time: Some(prost_types::Timestamp {
                seconds: last_sync.last_sync_time,
                nanos: 0,
            }),
            last_sync_duration: last_sync
                .last_sync_duration
                .map(|seconds| prost_types::Duration { seconds, nanos: 0 }),
            last_sync_bytes: last_sync.last_sync_bytes,
        })
    }
}

fn check_secondary(info: &MirrorInfo) -> Result<()> {
    if info.state != MirrorImageState::Enabled {
        return Err(ReplError::validation("image mirroring is not enabled"));
    }
    if info.primary {
        return Err(ReplError::validation("image is in primary state"));
    }
    Ok(())
}

// Initial replay may not have populated the status yet.
fn status_fetch_error(e: MirrorError) -> ReplError {
    if e.is_image_not_found() {
        return ReplError::transitional(e.to_string());
    }
    log_err(ReplError::internal(e.to_string()))
}

fn log_err(e: ReplError) -> ReplError {
    error!("{}", e);
    e
}

fn cancellation_token<T>(request: &Request<T>) -> Option<CancellationToken> {
    request.extensions().get::<CancellationToken>().cloned()
}

/// Races `fut` against `token`. Dropping the losing handler future releases
/// everything it holds.
async fn with_cancellation<T>(
    token: Option<CancellationToken>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let Some(token) = token else {
        return fut.await;
    };
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            warn!("request cancelled");
            Err(ReplError::Cancelled)
        }
        res = fut => res,
    }
}

fn respond<T>(result: Result<T>) -> std::result::Result<Response<T>, Status> {
    result.map(Response::new).map_err(|e| {
        if e.is_retryable() {
            warn!("request deferred, caller should retry: {}", e);
        }
        Status::from(e)
    })
}
