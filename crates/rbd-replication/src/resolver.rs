//! Volume ID to image resolution.
//!
//! Handlers never open images themselves: they hand the CO-supplied volume
//! ID to an [`ImageResolver`] and get back a scoped [`ImageHandle`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::ReplicationConfig;
use crate::credentials::Credentials;
use crate::volume_id::{CsiIdentifier, VolumeIdError};

/// Errors resolving a volume ID to an image.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Image backing the volume does not exist.
    #[error("image {image} not found")]
    ImageNotFound {
        /// Image that was looked up.
        image: String,
    },

    /// Pool backing the volume does not exist.
    #[error("pool {pool} not found")]
    PoolNotFound {
        /// Pool name, or its numeric ID when the name is unknown.
        pool: String,
    },

    /// Volume ID is malformed.
    #[error("invalid volume ID: {0}")]
    InvalidVolumeId(#[from] VolumeIdError),

    /// Volume ID names a cluster this instance is not configured for.
    #[error("cluster {cluster_id} is not configured")]
    UnknownCluster {
        /// Cluster named in the volume ID.
        cluster_id: String,
    },

    /// Journal lookup failed for another reason.
    #[error("journal lookup failed: {msg}")]
    Journal {
        /// What went wrong.
        msg: String,
    },
}

/// Connection parameters for the cluster holding an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConnection {
    /// Cluster ID from the volume ID.
    pub cluster_id: String,
    /// Comma-separated monitor addresses.
    pub monitors: String,
    /// Cluster user ID.
    pub user_id: String,
    /// Key file of the request credentials.
    pub key_file: PathBuf,
}

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// An opened image. Whatever the resolver attached is released on drop.
pub struct ImageHandle {
    /// Volume ID the handle was resolved from.
    pub volume_id: String,
    /// Pool holding the image.
    pub pool: String,
    /// RADOS namespace inside the pool; empty for the default namespace.
    pub rados_namespace: String,
    /// Image name.
    pub image_name: String,
    /// How to reach the cluster.
    pub connection: ClusterConnection,
    release: Option<ReleaseHook>,
}

impl ImageHandle {
    /// Creates a handle with nothing to release.
    pub fn new(
        volume_id: impl Into<String>,
        pool: impl Into<String>,
        rados_namespace: impl Into<String>,
        image_name: impl Into<String>,
        connection: ClusterConnection,
    ) -> Self {
        Self {
            volume_id: volume_id.into(),
            pool: pool.into(),
            rados_namespace: rados_namespace.into(),
            image_name: image_name.into(),
            connection,
            release: None,
        }
    }

    /// Runs `hook` exactly once when the handle is dropped.
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    /// Image spec in `pool[/namespace]/image` form.
    pub fn image_spec(&self) -> String {
        if self.rados_namespace.is_empty() {
            format!("{}/{}", self.pool, self.image_name)
        } else {
            format!("{}/{}/{}", self.pool, self.rados_namespace, self.image_name)
        }
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("volume_id", &self.volume_id)
            .field("image", &self.image_spec())
            .field("cluster_id", &self.connection.cluster_id)
            .finish()
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.image_spec())
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

/// Resolves a CO-supplied volume ID to an opened image.
#[async_trait]
pub trait ImageResolver: Send + Sync + 'static {
    /// Look up and open the image behind `volume_id`.
    async fn resolve(
        &self,
        volume_id: &str,
        credentials: &Credentials,
        secrets: &HashMap<String, String>,
    ) -> Result<ImageHandle, ResolveError>;
}

/// Durable mapping from volume identity to pool and image names.
#[async_trait]
pub trait VolumeJournal: Send + Sync + 'static {
    /// Name of the pool with the given ID.
    async fn pool_name(&self, conn: &ClusterConnection, pool_id: i64)
        -> Result<String, ResolveError>;

    /// Name of the image recorded for `object_uuid`, verified to exist.
    async fn image_name(
        &self,
        conn: &ClusterConnection,
        pool: &str,
        rados_namespace: &str,
        object_uuid: &str,
    ) -> Result<String, ResolveError>;
}

/// Resolver that decodes the volume ID and consults a [`VolumeJournal`].
pub struct JournalImageResolver {
    config: Arc<ReplicationConfig>,
    journal: Arc<dyn VolumeJournal>,
}

impl JournalImageResolver {
    /// Creates a resolver over the configured clusters.
    pub fn new(config: Arc<ReplicationConfig>, journal: Arc<dyn VolumeJournal>) -> Self {
        Self { config, journal }
    }
}

#[async_trait]
impl ImageResolver for JournalImageResolver {
    async fn resolve(
        &self,
        volume_id: &str,
        credentials: &Credentials,
        _secrets: &HashMap<String, String>,
    ) -> Result<ImageHandle, ResolveError> {
        let ci = CsiIdentifier::decompose(volume_id)?;
        let cluster =
            self.config
                .cluster(&ci.cluster_id)
                .ok_or_else(|| ResolveError::UnknownCluster {
                    cluster_id: ci.cluster_id.clone(),
                })?;

        let conn = ClusterConnection {
            cluster_id: ci.cluster_id.clone(),
            monitors: cluster.monitors.join(","),
            user_id: credentials.id().to_string(),
            key_file: credentials.key_file_path(),
        };

        let pool = self.journal.pool_name(&conn, ci.location_id).await?;
        let image_name = self
            .journal
            .image_name(&conn, &pool, &cluster.rados_namespace, &ci.object_uuid)
            .await?;
        debug!(
            "resolved volume {} ({}) to {}/{}",
            volume_id, ci, pool, image_name
        );

        Ok(ImageHandle::new(
            volume_id,
            pool,
            cluster.rados_namespace.clone(),
            image_name,
            conn,
        ))
    }
}
