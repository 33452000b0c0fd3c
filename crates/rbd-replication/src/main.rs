#![warn(missing_docs)]

//! `rbd-repl`: runs one replication operation against a volume.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rbd_replication::proto::{
    DemoteVolumeRequest, DisableVolumeReplicationRequest, EnableVolumeReplicationRequest,
    GetVolumeReplicationInfoRequest, PromoteVolumeRequest, ResyncVolumeRequest,
};
use rbd_replication::resolver::JournalImageResolver;
use rbd_replication::{RbdCli, ReplicationConfig, ReplicationServer, VolumeLocks};
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// RBD volume replication control.
#[derive(Debug, Parser)]
#[command(name = "rbd-repl", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "/etc/rbd-replication/config.toml")]
    config: PathBuf,

    /// Operation to run.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct Target {
    /// Volume ID as issued by the provisioner.
    #[arg(long)]
    volume_id: String,

    /// JSON file holding the request secrets (`userID`, `userKey`).
    #[arg(long)]
    secrets: PathBuf,

    /// Request parameter as `key=value`; may be repeated.
    #[arg(long = "param", value_parser = parse_key_val)]
    params: Vec<(String, String)>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enable mirroring.
    Enable(Target),
    /// Disable mirroring.
    Disable(Target),
    /// Promote to primary.
    Promote {
        #[command(flatten)]
        target: Target,
        /// Promote even if the peer cannot be demoted.
        #[arg(long)]
        force: bool,
    },
    /// Demote to secondary.
    Demote(Target),
    /// Resync a split-brained secondary.
    Resync(Target),
    /// Show the last completed sync of a primary.
    Info(Target),
}

fn parse_key_val(s: &str) -> Result<(String, String)> {
    let Some((k, v)) = s.split_once('=') else {
        bail!("invalid parameter {s:?}, expected key=value");
    };
    Ok((k.to_string(), v.to_string()))
}

fn read_secrets(path: &Path) -> Result<HashMap<String, String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read secrets {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("malformed secrets {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        ReplicationConfig::from_file(&cli.config)?
    } else {
        tracing::warn!(
            "Config file not found, using defaults: {}",
            cli.config.display()
        );
        ReplicationConfig::default()
    };
    let config = Arc::new(config);

    let rbd = Arc::new(RbdCli::new(Arc::clone(&config)));
    let resolver = Arc::new(JournalImageResolver::new(Arc::clone(&config), rbd.clone()));
    let server = ReplicationServer::new(config, Arc::new(VolumeLocks::new()), resolver, rbd);

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Command::Enable(t) => {
            let secrets = read_secrets(&t.secrets)?;
            let req = EnableVolumeReplicationRequest {
                volume_id: t.volume_id,
                parameters: t.params.into_iter().collect(),
                secrets,
            };
            server
                .enable_volume_replication(with_token(req, &token))
                .await?;
            println!("mirroring enabled");
        }
        Command::Disable(t) => {
            let secrets = read_secrets(&t.secrets)?;
            let req = DisableVolumeReplicationRequest {
                volume_id: t.volume_id,
                parameters: t.params.into_iter().collect(),
                secrets,
            };
            server
                .disable_volume_replication(with_token(req, &token))
                .await?;
            println!("mirroring disabled");
        }
        Command::Promote { target, force } => {
            let secrets = read_secrets(&target.secrets)?;
            let req = PromoteVolumeRequest {
                volume_id: target.volume_id,
                force,
                parameters: target.params.into_iter().collect(),
                secrets,
            };
            server.promote_volume(with_token(req, &token)).await?;
            println!("volume promoted");
        }
        Command::Demote(t) => {
            let secrets = read_secrets(&t.secrets)?;
            let req = DemoteVolumeRequest {
                volume_id: t.volume_id,
                force: false,
                parameters: t.params.into_iter().collect(),
                secrets,
            };
            server.demote_volume(with_token(req, &token)).await?;
            println!("volume demoted");
        }
        Command::Resync(t) => {
            let secrets = read_secrets(&t.secrets)?;
            let req = ResyncVolumeRequest {
                volume_id: t.volume_id,
                force: false,
                parameters: t.params.into_iter().collect(),
                secrets,
            };
            let resp = server.resync_volume(with_token(req, &token)).await?;
            println!("ready: {}", resp.into_inner().ready);
        }
        Command::Info(t) => {
            let secrets = read_secrets(&t.secrets)?;
            let req = GetVolumeReplicationInfoRequest {
                volume_id: t.volume_id,
                secrets,
            };
            let resp = server
                .get_volume_replication_info(with_token(req, &token))
                .await?
                .into_inner();
            let last_sync_time = resp
                .last_sync_time
                .and_then(|t| chrono::DateTime::from_timestamp(t.seconds, 0))
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            println!("last sync time: {last_sync_time}");
            if let Some(d) = resp.last_sync_duration {
                println!("last sync duration: {}s", d.seconds);
            }
            println!("last sync bytes: {}", resp.last_sync_bytes);
        }
    }

    Ok(())
}

fn with_token<T>(message: T, token: &CancellationToken) -> Request<T> {
    let mut request = Request::new(message);
    request.extensions_mut().insert(token.clone());
    request
}
