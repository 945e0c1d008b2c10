//! PanTransfer Core - Transfer Engine
//!
//! Chunked uploads and resumable downloads against a cloud drive's HTTP API.
//! [`PanTransfer`] wires settings, the HTTP client and the event channel
//! together; the sessions in [`engine`] can also be driven directly with any
//! [`PanApi`] implementation.

mod api;
mod client;
mod config;
pub mod engine;
mod errno;
mod error;
mod hasher;

pub use api::*;
pub use client::*;
pub use config::*;
pub use engine::{
    error_log_path_for, temp_path_for, DownloadRequest, DownloadSession, ErrorLog, EventSink,
    UploadRequest, UploadSession, ERROR_LOG_SUFFIX, TEMP_SUFFIX,
};
pub use errno::{describe as describe_errno, provider_error};
pub use error::*;
pub use hasher::*;

use pantransfer_types::{
    BlockManifest, DownloadMode, DownloadSource, Settings, TransferEvent, TransferReport,
    TransferTier,
};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::info;

/// Where and how to save a remote file
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub source: DownloadSource,
    pub local_dir: PathBuf,
    /// Local file name, defaults to the remote file name
    pub local_name: Option<String>,
    pub overwrite: bool,
    pub mode: DownloadMode,
}

/// The main PanTransfer instance
pub struct PanTransfer {
    settings: Settings,
    client: PanClient,
    event_tx: broadcast::Sender<TransferEvent>,
}

impl PanTransfer {
    /// Create an instance from settings. Fails without an access token.
    pub fn new(settings: Settings) -> Result<Self, TransferError> {
        let client = PanClient::new(&settings)?;
        let (event_tx, _) = broadcast::channel(1000);

        Ok(Self {
            settings,
            client,
            event_tx,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn client(&self) -> &PanClient {
        &self.client
    }

    /// Subscribe to transfer events
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.event_tx.subscribe()
    }

    fn events(&self) -> EventSink {
        EventSink::new(self.event_tx.clone())
    }

    /// Upload a local file
    pub async fn upload(&self, request: UploadRequest) -> Result<TransferReport, TransferError> {
        let session = UploadSession::prepare(&self.client, request, self.events()).await?;
        session.run().await
    }

    /// Resolve a download source and save it locally
    pub async fn download(&self, target: DownloadTarget) -> Result<TransferReport, TransferError> {
        let (link, remote_name) = self.resolve(&target.source).await?;
        let name = match target.local_name {
            Some(name) => name,
            None => remote_name,
        };
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(TransferError::InvalidPath(name));
        }

        let request = DownloadRequest {
            link,
            destination: target.local_dir.join(name),
            overwrite: target.overwrite,
            mode: target.mode,
            error_log: self.settings.enable_error_log,
        };
        let session = DownloadSession::prepare(&self.client, request, self.events()).await?;
        session.run().await
    }

    /// Turn a source into a direct link and the remote file name
    async fn resolve(&self, source: &DownloadSource) -> Result<(String, String), TransferError> {
        match source {
            DownloadSource::Link(link) => {
                self.client.validate_link(link)?;
                let fs_id = PanClient::fs_id_from_link(link)
                    .ok_or_else(|| TransferError::InvalidLink(link.clone()))?;
                let meta = self.client.file_meta(fs_id).await?;
                info!("Link points at {} ({} bytes)", meta.entry.path, meta.entry.size);
                Ok((link.clone(), meta.entry.name))
            }
            DownloadSource::FsId(fs_id) => {
                let (link, entry) = self.client.dlink_for_fs_id(*fs_id).await?;
                Ok((link, entry.name))
            }
            DownloadSource::Path(path) => {
                let (link, entry) = self.client.dlink_for_path(path).await?;
                Ok((link, entry.name))
            }
        }
    }
}

/// Compute the block manifest a tier would upload for a local file
pub async fn block_manifest(path: &Path, tier: TransferTier) -> Result<BlockManifest, TransferError> {
    let metadata = tokio::fs::metadata(path).await;
    match metadata {
        Ok(metadata) if metadata.is_file() => {}
        _ => return Err(TransferError::LocalFileMissing(path.to_path_buf())),
    }
    Ok(ChunkHasher::new(&tier.limits()).hash_file(path).await?)
}

/// Default retry count for breakpoint downloads from settings
pub fn retry_mode(settings: &Settings) -> DownloadMode {
    DownloadMode::BreakpointRetry {
        max_attempts: settings.max_attempts.max(1),
    }
}
