//! Multipart upload session
//!
//! `Init -> Precreated -> Uploading(i) -> Finalizing -> Done`, with every
//! state able to fall into `Failed`. The provider decides which blocks it
//! still needs and in what order; the session sends exactly that list.
//! Nothing is persisted, so a failed upload starts over from precreate.

use crate::api::{BlockUploadRequest, CreateFileRequest, CreatedFile, PanApi, PrecreateRequest};
use crate::engine::EventSink;
use crate::error::TransferError;
use crate::hasher::ChunkHasher;
use bytes::BytesMut;
use pantransfer_types::{
    BlockManifest, TransferEvent, TransferLimits, TransferReport, TransferTier, UploadPhase,
};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, error, info};

/// What to upload and where
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub local_path: PathBuf,
    /// Absolute remote directory
    pub target_dir: String,
    /// Remote file name, defaults to the local file name
    pub target_name: Option<String>,
    pub overwrite: bool,
    pub tier: TransferTier,
}

/// A single multipart upload
pub struct UploadSession<'a, A: PanApi + ?Sized> {
    api: &'a A,
    local_path: PathBuf,
    remote_path: String,
    total_size: u64,
    overwrite: bool,
    limits: TransferLimits,
    manifest: BlockManifest,
    upload_id: Option<String>,
    block_indices: Vec<u32>,
    phase: UploadPhase,
    events: EventSink,
}

impl<'a, A: PanApi + ?Sized> UploadSession<'a, A> {
    /// Validate the request and hash the local file.
    ///
    /// Every validation error is returned before any upload endpoint is
    /// called; the only request made here is the existence check for the
    /// target when overwrite is off.
    pub async fn prepare(
        api: &'a A,
        request: UploadRequest,
        events: EventSink,
    ) -> Result<Self, TransferError> {
        let limits = request.tier.limits();
        validate_target_dir(&request.target_dir)?;

        let metadata = tokio::fs::metadata(&request.local_path).await;
        let metadata = match metadata {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(TransferError::LocalFileMissing(request.local_path)),
        };
        let total_size = metadata.len();
        if total_size == 0 {
            return Err(TransferError::EmptyFile);
        }
        if total_size > limits.max_total_size {
            return Err(TransferError::FileTooLarge {
                size: total_size,
                max: limits.max_total_size,
            });
        }

        let name = match request.target_name {
            Some(name) => name,
            None => local_file_name(&request.local_path)?,
        };
        let remote_path = join_remote(&request.target_dir, &name)?;

        if !request.overwrite && api.remote_file_exists(&remote_path).await? {
            return Err(TransferError::AlreadyExists(remote_path));
        }

        let manifest = ChunkHasher::new(&limits)
            .with_events(events.clone())
            .hash_file(&request.local_path)
            .await?;
        info!(
            "Prepared upload {} -> {} ({} bytes, {} blocks, tier {})",
            request.local_path.display(),
            remote_path,
            total_size,
            manifest.len(),
            request.tier
        );

        Ok(Self {
            api,
            local_path: request.local_path,
            remote_path,
            total_size,
            overwrite: request.overwrite,
            limits,
            manifest,
            upload_id: None,
            block_indices: Vec::new(),
            phase: UploadPhase::Init,
            events,
        })
    }

    pub fn phase(&self) -> &UploadPhase {
        &self.phase
    }

    pub fn manifest(&self) -> &BlockManifest {
        &self.manifest
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    /// Block indices the provider asked for, in its order
    pub fn block_indices(&self) -> &[u32] {
        &self.block_indices
    }

    /// Run all three phases
    pub async fn run(mut self) -> Result<TransferReport, TransferError> {
        self.precreate().await?;
        self.upload_blocks().await?;
        let created = self.finalize().await?;

        Ok(TransferReport {
            local_path: self.local_path,
            remote: created.path,
            bytes: self.total_size,
            message: "upload complete".to_string(),
        })
    }

    /// `Init -> Precreated`
    pub async fn precreate(&mut self) -> Result<(), TransferError> {
        self.expect_phase(matches!(self.phase, UploadPhase::Init), "precreate")?;

        let request = PrecreateRequest {
            path: &self.remote_path,
            size: self.total_size,
            block_list: &self.manifest,
            overwrite: self.overwrite,
        };
        let result = self.api.precreate(request).await;
        let response = match result {
            Ok(response) => response,
            Err(e) => return Err(self.fail(TransferError::Precreate(Box::new(e)))),
        };

        let block_count = self.manifest.len() as u64;
        if let Some(bad) = response
            .block_list
            .iter()
            .find(|index| **index as u64 >= block_count)
        {
            let err = TransferError::MalformedResponse(format!(
                "precreate asked for block {bad} of a {block_count}-block file"
            ));
            return Err(self.fail(TransferError::Precreate(Box::new(err))));
        }

        info!(
            "Precreated {} (upload id {}, {} blocks requested)",
            self.remote_path,
            response.upload_id,
            response.block_list.len()
        );
        self.upload_id = Some(response.upload_id);
        self.block_indices = response.block_list;
        self.set_phase(UploadPhase::Precreated);
        Ok(())
    }

    /// `Precreated -> Uploading(i) -> ...`, one block at a time in server order
    pub async fn upload_blocks(&mut self) -> Result<(), TransferError> {
        self.expect_phase(matches!(self.phase, UploadPhase::Precreated), "upload blocks")?;
        let upload_id = self
            .upload_id
            .clone()
            .ok_or_else(|| TransferError::InvalidState("no upload id".into()))?;

        let opened = File::open(&self.local_path).await;
        let mut file = match opened {
            Ok(file) => file,
            Err(e) => return Err(self.fail(e.into())),
        };
        let mut buf = BytesMut::with_capacity(self.limits.block_size as usize);
        let mut uploaded = 0u64;

        for index in self.block_indices.clone() {
            self.set_phase(UploadPhase::Uploading { block: index });

            let len = self.limits.block_len(index, self.total_size) as usize;
            buf.clear();
            buf.resize(len, 0);
            let offset = index as u64 * self.limits.block_size;
            let read = async {
                file.seek(SeekFrom::Start(offset)).await?;
                file.read_exact(&mut buf[..]).await
            }
            .await;
            if let Err(e) = read {
                let err = TransferError::BlockUpload {
                    index,
                    source: Box::new(e.into()),
                };
                return Err(self.fail(err));
            }

            let request = BlockUploadRequest {
                path: &self.remote_path,
                upload_id: &upload_id,
                index,
            };
            debug!("Uploading block {} ({} bytes at offset {})", index, len, offset);
            let result = self.api.upload_block(request, buf.split().freeze()).await;
            if let Err(e) = result {
                let err = TransferError::BlockUpload {
                    index,
                    source: Box::new(e),
                };
                return Err(self.fail(err));
            }

            uploaded += len as u64;
            self.events.emit(TransferEvent::BlockUploaded {
                remote: self.remote_path.clone(),
                index,
            });
            self.events.emit(TransferEvent::UploadProgress {
                remote: self.remote_path.clone(),
                uploaded,
                total: self.total_size,
            });
        }

        self.set_phase(UploadPhase::Finalizing);
        Ok(())
    }

    /// `Finalizing -> Done`
    pub async fn finalize(&mut self) -> Result<CreatedFile, TransferError> {
        self.expect_phase(matches!(self.phase, UploadPhase::Finalizing), "finalize")?;
        let upload_id = self
            .upload_id
            .clone()
            .ok_or_else(|| TransferError::InvalidState("no upload id".into()))?;

        let request = CreateFileRequest {
            path: &self.remote_path,
            size: self.total_size,
            upload_id: &upload_id,
            block_list: &self.manifest,
            overwrite: self.overwrite,
        };
        let result = self.api.create_file(request).await;
        match result {
            Ok(created) => {
                info!("Upload {} complete (fs_id {})", created.path, created.fs_id);
                self.set_phase(UploadPhase::Done);
                Ok(created)
            }
            // Provider codes already carry a readable message
            Err(e @ TransferError::Provider { .. }) => Err(self.fail(e)),
            Err(e) => Err(self.fail(TransferError::Finalize(Box::new(e)))),
        }
    }

    fn expect_phase(&self, ok: bool, action: &str) -> Result<(), TransferError> {
        if ok {
            Ok(())
        } else {
            Err(TransferError::InvalidState(format!(
                "cannot {action} while {:?}",
                self.phase
            )))
        }
    }

    fn set_phase(&mut self, phase: UploadPhase) {
        self.phase = phase.clone();
        self.events.emit(TransferEvent::UploadPhaseChanged {
            remote: self.remote_path.clone(),
            phase,
        });
    }

    fn fail(&mut self, err: TransferError) -> TransferError {
        error!("Upload {} failed: {}", self.remote_path, err);
        self.set_phase(UploadPhase::Failed {
            reason: err.to_string(),
        });
        err
    }
}

fn validate_target_dir(dir: &str) -> Result<(), TransferError> {
    if dir == "/" {
        return Err(TransferError::RootTarget);
    }
    if !dir.starts_with('/') {
        return Err(TransferError::InvalidPath(dir.to_string()));
    }
    Ok(())
}

fn local_file_name(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::LocalFileMissing(path.to_path_buf()))
}

/// Join an absolute remote directory and a file name
pub fn join_remote(dir: &str, name: &str) -> Result<String, TransferError> {
    if name.is_empty() || name.contains('/') {
        return Err(TransferError::InvalidPath(name.to_string()));
    }
    Ok(format!("{}/{}", dir.trim_end_matches('/'), name))
}
