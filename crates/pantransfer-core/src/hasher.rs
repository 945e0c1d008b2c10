//! Block manifest hashing
//!
//! Streams a source once, front to back, in 1 KiB read units and produces
//! one MD5 digest per upload block. The provider compares these digests
//! against the blocks it receives, so the boundaries must line up exactly
//! with the block size of the account tier.

use crate::engine::EventSink;
use md5::{Digest, Md5};
use pantransfer_types::{BlockManifest, TransferEvent, TransferLimits, READ_UNIT};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Computes block manifests for a given tier
pub struct ChunkHasher {
    blocks_per_iteration: u32,
    events: EventSink,
}

impl ChunkHasher {
    pub fn new(limits: &TransferLimits) -> Self {
        Self {
            blocks_per_iteration: limits.blocks_per_iteration.max(1),
            events: EventSink::none(),
        }
    }

    /// Publish `HashProgress` events while hashing files
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Hash a local file
    pub async fn hash_file(&self, path: &Path) -> std::io::Result<BlockManifest> {
        let file = File::open(path).await?;
        let total = file.metadata().await?.len();
        self.hash_reader(file, Some((path.to_path_buf(), total))).await
    }

    /// Hash any async byte source
    pub async fn hash<R: AsyncRead + Unpin>(&self, reader: R) -> std::io::Result<BlockManifest> {
        self.hash_reader(reader, None).await
    }

    async fn hash_reader<R: AsyncRead + Unpin>(
        &self,
        mut reader: R,
        progress: Option<(PathBuf, u64)>,
    ) -> std::io::Result<BlockManifest> {
        let mut buf = [0u8; READ_UNIT];
        let mut digest = Md5::new();
        let mut hashes = Vec::new();
        let mut units = 0u32;
        let mut hashed = 0u64;

        loop {
            let n = read_unit(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }
            digest.update(&buf[..n]);
            units += 1;
            hashed += n as u64;

            if units == self.blocks_per_iteration {
                hashes.push(hex::encode(digest.finalize_reset()));
                units = 0;
                self.report(&progress, hashed);
            }
        }

        // Trailing partial block
        if units > 0 {
            hashes.push(hex::encode(digest.finalize()));
            self.report(&progress, hashed);
        }

        debug!("Hashed {} bytes into {} blocks", hashed, hashes.len());
        Ok(BlockManifest::new(hashes))
    }

    fn report(&self, progress: &Option<(PathBuf, u64)>, hashed: u64) {
        if let Some((path, total)) = progress {
            self.events.emit(TransferEvent::HashProgress {
                path: path.clone(),
                hashed,
                total: *total,
            });
        }
    }
}

/// Fill `buf` completely unless the source ends first
async fn read_unit<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
