//! In-memory provider shared by the session integration tests

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use md5::{Digest, Md5};
use pantransfer_core::{
    provider_error, BlockUploadRequest, CreateFileRequest, CreatedFile, PanApi, PrecreateRequest,
    PrecreateResponse, RangeResponse, TransferError,
};

pub const LINK: &str = "https://d.pcs.baidu.com/file/abc?fid=1-42";

/// Size of the pieces a mock body is delivered in
const BODY_CHUNK: usize = 64 * 1024;

/// How the mock answers the next range request
#[derive(Debug, Clone)]
pub enum RangeReply {
    /// Serve everything from the requested offset
    Serve,
    /// Declare the full remaining length but stop after `n` bytes
    CutAfter(usize),
    /// Send `n` bytes, then fail the connection
    FailAfter(usize),
    /// Send `n` bytes more than the declared length
    Overrun(usize),
    /// Reject the request with an HTTP status
    Status(u16),
}

/// One received block
#[derive(Debug, Clone)]
pub struct ReceivedBlock {
    pub index: u32,
    pub upload_id: String,
    pub len: usize,
    pub md5: String,
}

#[derive(Debug, Default)]
pub struct MockState {
    // upload side
    pub existing: HashSet<String>,
    pub block_order: Option<Vec<u32>>,
    pub precreate_errno: Option<i64>,
    pub fail_block: Option<u32>,
    pub create_errno: Option<i64>,
    pub exists_checks: usize,
    pub precreates: usize,
    pub blocks: Vec<ReceivedBlock>,
    pub creates: usize,
    pub created_manifest: Vec<String>,

    // download side
    pub content: Vec<u8>,
    pub ignore_range: bool,
    pub replies: VecDeque<RangeReply>,
    pub range_offsets: Vec<u64>,
}

/// Mock provider recording every call
#[derive(Debug, Clone, Default)]
pub struct MockPan {
    pub state: Arc<Mutex<MockState>>,
}

impl MockPan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serving(content: Vec<u8>) -> Self {
        let mock = Self::new();
        mock.state.lock().unwrap().content = content;
        mock
    }

    pub fn with<F: FnOnce(&mut MockState)>(self, f: F) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Calls made to any upload endpoint
    pub fn upload_calls(&self) -> usize {
        let state = self.state();
        state.exists_checks + state.precreates + state.blocks.len() + state.creates
    }
}

#[async_trait]
impl PanApi for MockPan {
    async fn remote_file_exists(&self, path: &str) -> Result<bool, TransferError> {
        let mut state = self.state.lock().unwrap();
        state.exists_checks += 1;
        Ok(state.existing.contains(path))
    }

    async fn precreate(
        &self,
        request: PrecreateRequest<'_>,
    ) -> Result<PrecreateResponse, TransferError> {
        let mut state = self.state.lock().unwrap();
        state.precreates += 1;
        if let Some(errno) = state.precreate_errno {
            return Err(provider_error(errno, None));
        }

        let block_list = state
            .block_order
            .clone()
            .unwrap_or_else(|| (0..request.block_list.len() as u32).collect());
        Ok(PrecreateResponse {
            upload_id: "N1-upload".to_string(),
            block_list,
        })
    }

    async fn upload_block(
        &self,
        request: BlockUploadRequest<'_>,
        data: Bytes,
    ) -> Result<(), TransferError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_block == Some(request.index) {
            return Err(provider_error(31363, None));
        }

        state.blocks.push(ReceivedBlock {
            index: request.index,
            upload_id: request.upload_id.to_string(),
            len: data.len(),
            md5: hex::encode(Md5::digest(&data)),
        });
        Ok(())
    }

    async fn create_file(
        &self,
        request: CreateFileRequest<'_>,
    ) -> Result<CreatedFile, TransferError> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        if let Some(errno) = state.create_errno {
            return Err(provider_error(errno, None));
        }

        state.created_manifest = request.block_list.hashes().to_vec();
        Ok(CreatedFile {
            fs_id: 42,
            path: request.path.to_string(),
            size: request.size,
        })
    }

    async fn open_range(&self, _link: &str, offset: u64) -> Result<RangeResponse, TransferError> {
        let mut state = self.state.lock().unwrap();
        state.range_offsets.push(offset);
        let reply = state.replies.pop_front().unwrap_or(RangeReply::Serve);

        if offset > 0 && offset >= state.content.len() as u64 && !state.ignore_range {
            return Err(TransferError::HttpStatus {
                status: 416,
                message: "range not satisfiable".to_string(),
            });
        }

        let (status, start) = if state.ignore_range || offset == 0 {
            (200, 0)
        } else {
            (206, offset as usize)
        };
        let remaining = &state.content[start.min(state.content.len())..];
        let content_length = Some(remaining.len() as u64);

        let (sent, trailer): (Vec<u8>, Option<TransferError>) = match reply {
            RangeReply::Serve => (remaining.to_vec(), None),
            RangeReply::CutAfter(n) => (remaining[..n.min(remaining.len())].to_vec(), None),
            RangeReply::FailAfter(n) => (
                remaining[..n.min(remaining.len())].to_vec(),
                Some(TransferError::Io(std::io::Error::from(
                    std::io::ErrorKind::ConnectionReset,
                ))),
            ),
            RangeReply::Overrun(n) => {
                let mut body = remaining.to_vec();
                body.extend(std::iter::repeat(0xEE).take(n));
                (body, None)
            }
            RangeReply::Status(status) => {
                return Err(TransferError::HttpStatus {
                    status,
                    message: "mock rejection".to_string(),
                })
            }
        };

        let mut chunks: Vec<Result<Bytes, TransferError>> = sent
            .chunks(BODY_CHUNK)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if let Some(err) = trailer {
            chunks.push(Err(err));
        }
        Ok(RangeResponse {
            status,
            content_length,
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// Deterministic non-repeating test content
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 251) as u8).collect()
}
