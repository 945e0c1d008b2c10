//! Error types for PanTransfer core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while transferring files
#[derive(Debug, Error)]
pub enum TransferError {
    // Validation, detected before any network call
    #[error("target path cannot be the root directory")]
    RootTarget,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("local file does not exist: {}", .0.display())]
    LocalFileMissing(PathBuf),

    #[error("multipart upload refuses empty files")]
    EmptyFile,

    #[error("file too large: {size} bytes exceeds the tier limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid download link: {0}")]
    InvalidLink(String),

    #[error("invalid save location: {}", .0.display())]
    InvalidDestination(PathBuf),

    #[error("{0} is a directory")]
    NotAFile(String),

    #[error("no access token configured")]
    MissingToken,

    // Provider
    #[error("{message}")]
    Provider { errno: i64, message: String },

    #[error("server returned HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    // Upload phases
    #[error("pre-upload failed: {0}")]
    Precreate(#[source] Box<TransferError>),

    #[error("block {index} upload failed: {source}")]
    BlockUpload {
        index: u32,
        #[source]
        source: Box<TransferError>,
    },

    #[error("create file failed: {0}")]
    Finalize(#[source] Box<TransferError>),

    // Transport and local I/O
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("connection closed after {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Unexpected
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid session state: {0}")]
    InvalidState(String),
}

impl TransferError {
    /// Check if retrying the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Network(_)
            | TransferError::Incomplete { .. }
            | TransferError::Io(_) => true,
            TransferError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error was raised before any byte left the machine
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TransferError::RootTarget
                | TransferError::InvalidPath(_)
                | TransferError::LocalFileMissing(_)
                | TransferError::EmptyFile
                | TransferError::FileTooLarge { .. }
                | TransferError::AlreadyExists(_)
                | TransferError::InvalidLink(_)
                | TransferError::InvalidDestination(_)
                | TransferError::NotAFile(_)
                | TransferError::MissingToken
        )
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(error: serde_json::Error) -> Self {
        TransferError::MalformedResponse(error.to_string())
    }
}

impl From<TransferError> for String {
    fn from(error: TransferError) -> Self {
        error.to_string()
    }
}
