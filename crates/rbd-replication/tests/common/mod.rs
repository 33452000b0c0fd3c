//! Shared fakes for the handler integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rbd_replication::credentials::Credentials;
use rbd_replication::params::SchedulingInterval;
use rbd_replication::resolver::ClusterConnection;
use rbd_replication::{
    ImageHandle, ImageResolver, MirrorClient, MirrorError, MirrorImageState, MirrorInfo,
    MirrorMode, MirrorStatus, ReplicationConfig, ReplicationServer, ResolveError, SiteStatus,
    VolumeLocks,
};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const VOLUME_ID: &str = "0001-0009-rook-ceph-0000000000000002-a8b3c1d2-0e4f-11ee-9c2a-0242ac120002";

/// One recorded mirror client call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Info,
    Status,
    Enable(MirrorMode),
    Disable { force: bool },
    Promote { force: bool },
    Demote,
    Resync,
    Schedule {
        interval: String,
        start_time: Option<String>,
    },
}

impl Call {
    fn op(&self) -> &'static str {
        match self {
            Call::Info => "info",
            Call::Status => "status",
            Call::Enable(_) => "enable",
            Call::Disable { .. } => "disable",
            Call::Promote { .. } => "promote",
            Call::Demote => "demote",
            Call::Resync => "resync",
            Call::Schedule { .. } => "schedule",
        }
    }

    /// Whether the call changes mirroring state on the cluster.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::Info | Call::Status)
    }
}

/// Canned failure for one mirror operation.
#[derive(Debug, Clone)]
pub enum Failure {
    ImageNotFound,
    Remote(String),
    Panic,
}

/// In-memory mirror client.
pub struct FakeMirror {
    info: Mutex<MirrorInfo>,
    info_after_disable: Mutex<Option<MirrorInfo>>,
    info_failure_after_disable: Mutex<Option<Failure>>,
    status: Mutex<MirrorStatus>,
    failures: Mutex<HashMap<&'static str, Failure>>,
    calls: Mutex<Vec<Call>>,
    gated: Mutex<Option<&'static str>>,
    /// Signalled when a gated call is entered.
    pub entered: Notify,
    /// Releases a gated call.
    pub proceed: Notify,
}

impl FakeMirror {
    pub fn new(info: MirrorInfo) -> Self {
        Self {
            info: Mutex::new(info),
            info_after_disable: Mutex::new(None),
            info_failure_after_disable: Mutex::new(None),
            status: Mutex::new(MirrorStatus::default()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gated: Mutex::new(None),
            entered: Notify::new(),
            proceed: Notify::new(),
        }
    }

    pub fn set_status(&self, status: MirrorStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_info_after_disable(&self, info: MirrorInfo) {
        *self.info_after_disable.lock().unwrap() = Some(info);
    }

    /// Makes mirror info lookups fail once a disable has gone through.
    pub fn fail_info_after_disable(&self, failure: Failure) {
        *self.info_failure_after_disable.lock().unwrap() = Some(failure);
    }

    pub fn fail(&self, op: &'static str, failure: Failure) {
        self.failures.lock().unwrap().insert(op, failure);
    }

    /// Blocks the next call of `op` until `proceed` is notified.
    pub fn gate(&self, op: &'static str) {
        *self.gated.lock().unwrap() = Some(op);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    async fn record(&self, call: Call) -> Result<(), MirrorError> {
        let op = call.op();
        self.calls.lock().unwrap().push(call);

        let gated = {
            let mut gated = self.gated.lock().unwrap();
            if *gated == Some(op) {
                gated.take();
                true
            } else {
                false
            }
        };
        if gated {
            self.entered.notify_one();
            self.proceed.notified().await;
        }

        let failure = self.failures.lock().unwrap().get(op).cloned();
        match failure {
            None => Ok(()),
            Some(Failure::ImageNotFound) => Err(MirrorError::ImageNotFound {
                msg: "rbd: error opening image: (2) No such file or directory".to_string(),
            }),
            Some(Failure::Remote(msg)) => Err(MirrorError::Remote { msg }),
            Some(Failure::Panic) => panic!("mirror daemon exploded during {op}"),
        }
    }
}

#[async_trait]
impl MirrorClient for FakeMirror {
    async fn get_mirror_info(&self, _image: &ImageHandle) -> Result<MirrorInfo, MirrorError> {
        self.record(Call::Info).await?;
        Ok(*self.info.lock().unwrap())
    }

    async fn get_mirror_status(&self, _image: &ImageHandle) -> Result<MirrorStatus, MirrorError> {
        self.record(Call::Status).await?;
        Ok(self.status.lock().unwrap().clone())
    }

    async fn enable_mirroring(
        &self,
        _image: &ImageHandle,
        mode: MirrorMode,
    ) -> Result<(), MirrorError> {
        self.record(Call::Enable(mode)).await?;
        *self.info.lock().unwrap() = MirrorInfo {
            state: MirrorImageState::Enabled,
            primary: true,
        };
        Ok(())
    }

    async fn disable_mirroring(
        &self,
        _image: &ImageHandle,
        force: bool,
    ) -> Result<(), MirrorError> {
        self.record(Call::Disable { force }).await?;
        let next = self
            .info_after_disable
            .lock()
            .unwrap()
            .take()
            .unwrap_or(MirrorInfo {
                state: MirrorImageState::Disabled,
                primary: false,
            });
        *self.info.lock().unwrap() = next;
        if let Some(failure) = self.info_failure_after_disable.lock().unwrap().take() {
            self.fail("info", failure);
        }
        Ok(())
    }

    async fn promote(&self, _image: &ImageHandle, force: bool) -> Result<(), MirrorError> {
        self.record(Call::Promote { force }).await?;
        self.info.lock().unwrap().primary = true;
        Ok(())
    }

    async fn demote(&self, _image: &ImageHandle) -> Result<(), MirrorError> {
        self.record(Call::Demote).await?;
        self.info.lock().unwrap().primary = false;
        Ok(())
    }

    async fn resync(&self, _image: &ImageHandle) -> Result<(), MirrorError> {
        self.record(Call::Resync).await
    }

    async fn add_snapshot_schedule(
        &self,
        _image: &ImageHandle,
        interval: &SchedulingInterval,
        start_time: Option<&str>,
    ) -> Result<(), MirrorError> {
        self.record(Call::Schedule {
            interval: interval.as_str().to_string(),
            start_time: start_time.map(str::to_string),
        })
        .await
    }
}

/// Canned resolution failure.
#[derive(Debug, Clone)]
pub enum ResolveFailure {
    ImageNotFound,
    PoolNotFound(String),
    UnknownCluster,
}

/// Resolver that hands out counted image handles.
#[derive(Default)]
pub struct FakeResolver {
    pub opened: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    failure: Mutex<Option<ResolveFailure>>,
    key_files: Mutex<Vec<PathBuf>>,
}

impl FakeResolver {
    pub fn fail(&self, failure: ResolveFailure) {
        *self.failure.lock().unwrap() = Some(failure);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Key files seen while resolving, in call order.
    pub fn key_files(&self) -> Vec<PathBuf> {
        self.key_files.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageResolver for FakeResolver {
    async fn resolve(
        &self,
        volume_id: &str,
        credentials: &Credentials,
        _secrets: &HashMap<String, String>,
    ) -> Result<ImageHandle, ResolveError> {
        self.key_files
            .lock()
            .unwrap()
            .push(credentials.key_file_path());
        assert!(credentials.key_file().exists());

        if let Some(failure) = self.failure.lock().unwrap().clone() {
            return Err(match failure {
                ResolveFailure::ImageNotFound => ResolveError::ImageNotFound {
                    image: "replicapool/csi-vol-x".to_string(),
                },
                ResolveFailure::PoolNotFound(pool) => ResolveError::PoolNotFound { pool },
                ResolveFailure::UnknownCluster => ResolveError::UnknownCluster {
                    cluster_id: "rook-ceph".to_string(),
                },
            });
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&self.released);
        let conn = ClusterConnection {
            cluster_id: "rook-ceph".to_string(),
            monitors: "10.0.0.1:6789".to_string(),
            user_id: credentials.id().to_string(),
            key_file: credentials.key_file_path(),
        };
        Ok(
            ImageHandle::new(volume_id, "replicapool", "", "csi-vol-a8b3c1d2", conn)
                .with_release_hook(move || {
                    released.fetch_add(1, Ordering::SeqCst);
                }),
        )
    }
}

/// Server wired to fakes, with a private key directory.
pub struct Harness {
    pub server: Arc<ReplicationServer>,
    pub mirror: Arc<FakeMirror>,
    pub resolver: Arc<FakeResolver>,
    pub locks: Arc<VolumeLocks>,
    pub key_dir: TempDir,
}

impl Harness {
    pub fn new(info: MirrorInfo) -> Self {
        let key_dir = TempDir::new().unwrap();
        let config = Arc::new(ReplicationConfig {
            key_dir: Some(key_dir.path().to_path_buf()),
            ..Default::default()
        });
        let mirror = Arc::new(FakeMirror::new(info));
        let resolver = Arc::new(FakeResolver::default());
        let locks = Arc::new(VolumeLocks::new());
        let server = Arc::new(ReplicationServer::new(
            config,
            Arc::clone(&locks),
            resolver.clone(),
            mirror.clone(),
        ));
        Self {
            server,
            mirror,
            resolver,
            locks,
            key_dir,
        }
    }

    /// Key files still present in the key directory.
    pub fn live_key_files(&self) -> usize {
        std::fs::read_dir(self.key_dir.path()).unwrap().count()
    }

    /// Asserts nothing acquired by a finished call is still held.
    pub fn assert_released(&self) {
        assert!(self.locks.is_empty(), "volume lock leaked");
        assert_eq!(
            self.resolver.opened(),
            self.resolver.released(),
            "image handle leaked"
        );
        assert_eq!(self.live_key_files(), 0, "key file leaked");
    }
}

pub fn info(state: MirrorImageState, primary: bool) -> MirrorInfo {
    MirrorInfo { state, primary }
}

pub fn secrets() -> HashMap<String, String> {
    kv(&[("userID", "csi-rbd-provisioner"), ("userKey", "AQBx0ZRkAAAAABAA")])
}

pub fn kv(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn site(uuid: &str, state: &str, up: bool, description: &str) -> SiteStatus {
    SiteStatus {
        mirror_uuid: uuid.to_string(),
        state: state.to_string(),
        up,
        description: description.to_string(),
        last_update: 1_684_675_261,
    }
}
