//! Remote transfer endpoints
//!
//! Sessions only talk to the provider through [`PanApi`], which keeps the
//! upload and download state machines independent of HTTP and lets tests
//! drive them with an in-memory implementation.

use crate::error::TransferError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use pantransfer_types::BlockManifest;
use std::fmt;

/// Body of a download response, yielded in arbitrary-sized pieces
pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Precreate call input
#[derive(Debug, Clone, Copy)]
pub struct PrecreateRequest<'a> {
    pub path: &'a str,
    pub size: u64,
    pub block_list: &'a BlockManifest,
    pub overwrite: bool,
}

/// Upload session opened by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecreateResponse {
    pub upload_id: String,
    /// Block indices the provider still needs, in the order to send them
    pub block_list: Vec<u32>,
}

/// Metadata attached to one block upload
#[derive(Debug, Clone, Copy)]
pub struct BlockUploadRequest<'a> {
    pub path: &'a str,
    pub upload_id: &'a str,
    pub index: u32,
}

/// Finalize call input
#[derive(Debug, Clone, Copy)]
pub struct CreateFileRequest<'a> {
    pub path: &'a str,
    pub size: u64,
    pub upload_id: &'a str,
    pub block_list: &'a BlockManifest,
    pub overwrite: bool,
}

/// File created by a successful finalize
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreatedFile {
    pub fs_id: u64,
    pub path: String,
    pub size: u64,
}

/// An accepted (200 or 206) download response
pub struct RangeResponse {
    pub status: u16,
    /// Bytes still to come, when the server declared them
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Provider operations used by transfer sessions
#[async_trait]
pub trait PanApi: Send + Sync {
    /// Whether a file already exists at the absolute remote `path`
    async fn remote_file_exists(&self, path: &str) -> Result<bool, TransferError>;

    /// Open a multipart upload
    async fn precreate(
        &self,
        request: PrecreateRequest<'_>,
    ) -> Result<PrecreateResponse, TransferError>;

    /// Send one block of an open upload
    async fn upload_block(
        &self,
        request: BlockUploadRequest<'_>,
        data: Bytes,
    ) -> Result<(), TransferError>;

    /// Assemble the uploaded blocks into a file
    async fn create_file(&self, request: CreateFileRequest<'_>)
        -> Result<CreatedFile, TransferError>;

    /// GET a direct link, asking for `bytes=offset-` when `offset > 0`.
    /// Statuses other than 200/206 are returned as errors.
    async fn open_range(&self, link: &str, offset: u64) -> Result<RangeResponse, TransferError>;
}
