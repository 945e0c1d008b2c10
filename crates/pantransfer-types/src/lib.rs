//! Shared types for PanTransfer
//!
//! This crate contains the data structures shared between the transfer
//! engine and the CLI: account tiers and their limits, the block manifest,
//! transfer phases, progress events and persisted settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Size of a single read (hashing) or write (download) unit
pub const READ_UNIT: usize = 1024;

// ============================================================================
// Tier Types
// ============================================================================

/// Account service level, decides block size and maximum upload size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferTier {
    #[default]
    Standard,
    Plus,
    Premium,
}

impl TransferTier {
    /// Map the provider's integer account code. Unknown codes fall back to `Standard`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => TransferTier::Plus,
            2 => TransferTier::Premium,
            _ => TransferTier::Standard,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            TransferTier::Standard => 0,
            TransferTier::Plus => 1,
            TransferTier::Premium => 2,
        }
    }

    pub fn limits(self) -> TransferLimits {
        match self {
            TransferTier::Standard => TransferLimits {
                block_size: 4 * MIB,
                max_total_size: 4 * GIB,
                blocks_per_iteration: 4096,
            },
            TransferTier::Plus => TransferLimits {
                block_size: 16 * MIB,
                max_total_size: 10 * GIB,
                blocks_per_iteration: 16384,
            },
            TransferTier::Premium => TransferLimits {
                block_size: 32 * MIB,
                max_total_size: 20 * GIB,
                blocks_per_iteration: 32768,
            },
        }
    }
}

impl fmt::Display for TransferTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferTier::Standard => "standard",
            TransferTier::Plus => "plus",
            TransferTier::Premium => "premium",
        };
        f.write_str(name)
    }
}

/// Sizing constants derived from a [`TransferTier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLimits {
    /// Bytes per upload block
    pub block_size: u64,
    /// Largest file the tier may upload
    pub max_total_size: u64,
    /// Number of 1 KiB read units hashed into one manifest entry
    pub blocks_per_iteration: u32,
}

impl TransferLimits {
    /// Number of blocks a file of `size` bytes splits into
    pub fn block_count(&self, size: u64) -> u64 {
        size.div_ceil(self.block_size)
    }

    /// Length of block `index` for a file of `total_size` bytes
    pub fn block_len(&self, index: u32, total_size: u64) -> u64 {
        let start = index as u64 * self.block_size;
        total_size.saturating_sub(start).min(self.block_size)
    }
}

// ============================================================================
// Manifest Types
// ============================================================================

/// Ordered per-block content hashes, submitted as the provider's `block_list`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockManifest(Vec<String>);

impl BlockManifest {
    pub fn new(hashes: Vec<String>) -> Self {
        Self(hashes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hashes(&self) -> &[String] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

// ============================================================================
// Transfer Types
// ============================================================================

/// Phase of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "phase")]
pub enum UploadPhase {
    Init,
    Precreated,
    Uploading { block: u32 },
    Finalizing,
    Done,
    Failed { reason: String },
}

/// Phase of a download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "phase")]
pub enum DownloadPhase {
    Init,
    RangeRequested { offset: u64 },
    Streaming,
    Done,
    Failed { reason: String },
}

/// How a download treats its temporary file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    /// Single full request, temporary file removed on failure
    Simple,
    /// Single range request, temporary file kept for a later resume
    Breakpoint,
    /// Range requests repeated up to `max_attempts` times
    BreakpointRetry { max_attempts: u32 },
}

/// Where a download's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DownloadSource {
    Link(String),
    FsId(u64),
    Path(String),
}

/// A remote file or directory record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub fs_id: u64,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified_at: i64,
}

/// Outcome of a finished transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    pub local_path: PathBuf,
    pub remote: String,
    pub bytes: u64,
    pub message: String,
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} <-> {}, {} bytes)",
            self.message,
            self.local_path.display(),
            self.remote,
            self.bytes
        )
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by transfer sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransferEvent {
    HashProgress {
        path: PathBuf,
        hashed: u64,
        total: u64,
    },
    UploadProgress {
        remote: String,
        uploaded: u64,
        total: u64,
    },
    BlockUploaded {
        remote: String,
        index: u32,
    },
    UploadPhaseChanged {
        remote: String,
        phase: UploadPhase,
    },
    DownloadProgress {
        destination: PathBuf,
        downloaded: u64,
        total: Option<u64>,
    },
    AttemptStarted {
        destination: PathBuf,
        attempt: u32,
        offset: u64,
    },
    DownloadPhaseChanged {
        destination: PathBuf,
        phase: DownloadPhase,
    },
}

// ============================================================================
// Settings Types
// ============================================================================

/// Persisted client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub access_token: Option<String>,
    /// Account tier code: 0 standard, 1 plus, 2 premium
    pub tier: u8,
    /// Base URL of the metadata and upload-control API
    pub api_base: String,
    /// Base URL of the block upload and download host
    pub pcs_base: String,
    pub user_agent: String,
    /// Attempts made by a breakpoint download before giving up
    pub max_attempts: u32,
    pub enable_error_log: bool,
    pub default_download_dir: PathBuf,
}

impl Settings {
    pub fn tier(&self) -> TransferTier {
        TransferTier::from_code(self.tier)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            access_token: None,
            tier: 0,
            api_base: "https://pan.baidu.com".to_string(),
            pcs_base: "https://d.pcs.baidu.com".to_string(),
            user_agent: "pan.baidu.com".to_string(),
            max_attempts: 3,
            enable_error_log: false,
            default_download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}
