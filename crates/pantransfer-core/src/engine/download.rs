//! Resumable download session
//!
//! Bytes land in `<destination>_pttmp` and are renamed onto the destination
//! only after the body has been fully written and synced. A breakpoint
//! download keeps the temporary file on failure so the next run (or the
//! next attempt of the retry loop) continues from its current size with a
//! `Range: bytes=N-` request.
//!
//! The temporary path depends only on the destination. Two sessions on the
//! same destination write the same file, so callers must not run them
//! concurrently.

use crate::api::PanApi;
use crate::engine::{temp_path_for, ErrorLog, EventSink};
use crate::error::TransferError;
use futures::StreamExt;
use pantransfer_types::{DownloadMode, DownloadPhase, TransferEvent, TransferReport, READ_UNIT};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

const WRITE_BUFFER: usize = 64 * 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// What to download and where
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Direct link to the file's bytes
    pub link: String,
    pub destination: PathBuf,
    pub overwrite: bool,
    pub mode: DownloadMode,
    /// Append failures to `<destination>_pttmp_ErrorLog.txt`
    pub error_log: bool,
}

/// A single download into a temporary file
pub struct DownloadSession<'a, A: PanApi + ?Sized> {
    api: &'a A,
    link: String,
    destination: PathBuf,
    temp_path: PathBuf,
    mode: DownloadMode,
    error_log: Option<ErrorLog>,
    bytes_present: u64,
    expected_total: Option<u64>,
    attempts: u32,
    phase: DownloadPhase,
    events: EventSink,
}

impl<'a, A: PanApi + ?Sized> DownloadSession<'a, A> {
    /// Validate the link and destination, clearing the destination when overwriting.
    ///
    /// Without overwrite an existing destination is left untouched.
    pub async fn prepare(
        api: &'a A,
        request: DownloadRequest,
        events: EventSink,
    ) -> Result<Self, TransferError> {
        validate_link(&request.link)?;

        let parent = match request.destination.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
            Some(parent) => parent,
            None => return Err(TransferError::InvalidDestination(request.destination)),
        };
        if !tokio::fs::metadata(parent)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(TransferError::InvalidDestination(request.destination));
        }

        if tokio::fs::try_exists(&request.destination).await? {
            if !request.overwrite {
                return Err(TransferError::AlreadyExists(
                    request.destination.display().to_string(),
                ));
            }
            info!("Removing existing {}", request.destination.display());
            tokio::fs::remove_file(&request.destination).await?;
        }

        let temp_path = temp_path_for(&request.destination);
        let error_log = request
            .error_log
            .then(|| ErrorLog::for_destination(&request.destination));

        Ok(Self {
            api,
            link: request.link,
            destination: request.destination,
            temp_path,
            mode: request.mode,
            error_log,
            bytes_present: 0,
            expected_total: None,
            attempts: 0,
            phase: DownloadPhase::Init,
            events,
        })
    }

    pub fn phase(&self) -> &DownloadPhase {
        &self.phase
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Bytes found in the temporary file when the last attempt started
    pub fn bytes_present(&self) -> u64 {
        self.bytes_present
    }

    /// Size the file will have, once a response declared its length
    pub fn expected_total(&self) -> Option<u64> {
        self.expected_total
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Download according to the session's mode
    pub async fn run(mut self) -> Result<TransferReport, TransferError> {
        info!(
            "Downloading {} ({:?})",
            self.destination.display(),
            self.mode
        );
        let written = match self.mode {
            DownloadMode::Simple => self.run_simple().await?,
            DownloadMode::Breakpoint => self.run_breakpoint().await?,
            DownloadMode::BreakpointRetry { max_attempts } => {
                self.run_with_retry(max_attempts).await?
            }
        };
        self.finish(written).await
    }

    async fn run_simple(&mut self) -> Result<u64, TransferError> {
        match self.attempt(false).await {
            Ok(written) => Ok(written),
            Err(e) => {
                self.record_failure(&e.to_string()).await;
                // No resume contract, so partial bytes are useless
                match tokio::fs::remove_file(&self.temp_path).await {
                    Ok(()) => debug!("Removed {}", self.temp_path.display()),
                    Err(io) if io.kind() == std::io::ErrorKind::NotFound => {}
                    Err(io) => warn!("Could not remove {}: {}", self.temp_path.display(), io),
                }
                Err(self.fail(e))
            }
        }
    }

    async fn run_breakpoint(&mut self) -> Result<u64, TransferError> {
        match self.attempt(true).await {
            Ok(written) => Ok(written),
            Err(e) => {
                self.record_failure(&e.to_string()).await;
                Err(self.fail(e))
            }
        }
    }

    /// Repeat range attempts until one completes. Each attempt measures the
    /// temporary file again, so bytes written by a failed attempt count.
    async fn run_with_retry(&mut self, max_attempts: u32) -> Result<u64, TransferError> {
        let max_attempts = max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.attempt(true).await {
                Ok(written) => return Ok(written),
                Err(e) => {
                    self.record_failure(&format!("attempt {attempt}: {e}")).await;
                    if !e.is_retryable() {
                        return Err(self.fail(e));
                    }
                    warn!(
                        "Download {} attempt {}/{} failed: {}",
                        self.destination.display(),
                        attempt,
                        max_attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        let err = last_error
            .unwrap_or_else(|| TransferError::InvalidState("no download attempt ran".into()));
        Err(self.fail(err))
    }

    /// One `RangeRequested -> Streaming` cycle. Returns the temporary file's size.
    async fn attempt(&mut self, resume: bool) -> Result<u64, TransferError> {
        let offset = if resume {
            existing_len(&self.temp_path).await?
        } else {
            0
        };
        self.bytes_present = offset;
        self.attempts += 1;
        self.events.emit(TransferEvent::AttemptStarted {
            destination: self.destination.clone(),
            attempt: self.attempts,
            offset,
        });
        self.set_phase(DownloadPhase::RangeRequested { offset });

        let result = self.api.open_range(&self.link, offset).await;
        let response = match result {
            Ok(response) => response,
            // Nothing left past the end of the temporary file
            Err(TransferError::HttpStatus { status: 416, .. }) if offset > 0 => {
                warn!(
                    "Range bytes={}- not satisfiable for {}, keeping the temporary file as complete",
                    offset,
                    self.destination.display()
                );
                self.expected_total = Some(offset);
                self.emit_progress(offset);
                return Ok(offset);
            }
            Err(e) => return Err(e),
        };
        let offset = match response.status {
            206 => offset,
            200 => {
                if offset > 0 {
                    warn!(
                        "Server ignored range for {}, restarting from byte 0",
                        self.destination.display()
                    );
                }
                0
            }
            status => {
                return Err(TransferError::HttpStatus {
                    status,
                    message: "unexpected download status".to_string(),
                })
            }
        };
        self.expected_total = response.content_length.map(|remaining| offset + remaining);
        self.set_phase(DownloadPhase::Streaming);

        let file = if offset > 0 {
            OpenOptions::new().append(true).open(&self.temp_path).await?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.temp_path)
                .await?
        };
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);
        let mut body = response.body;
        let mut written = offset;
        let mut last_progress = Instant::now();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Keep what arrived so the next attempt can resume after it
                    writer.flush().await?;
                    return Err(e);
                }
            };
            for unit in chunk.chunks(READ_UNIT) {
                writer.write_all(unit).await?;
                written += unit.len() as u64;
            }

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                self.emit_progress(written);
                last_progress = Instant::now();
            }
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        self.emit_progress(written);

        if let Some(expected) = self.expected_total {
            if written < expected {
                return Err(TransferError::Incomplete {
                    expected,
                    received: written,
                });
            }
            if written > expected {
                warn!(
                    "Body for {} ran {} bytes past its declared length",
                    self.destination.display(),
                    written - expected
                );
            }
        }
        Ok(written)
    }

    /// `Streaming -> Done`
    async fn finish(mut self, written: u64) -> Result<TransferReport, TransferError> {
        if let Err(e) = tokio::fs::rename(&self.temp_path, &self.destination).await {
            return Err(self.fail(e.into()));
        }
        self.set_phase(DownloadPhase::Done);
        info!(
            "Download {} complete ({} bytes, {} attempt(s))",
            self.destination.display(),
            written,
            self.attempts
        );

        Ok(TransferReport {
            local_path: self.destination,
            remote: self.link,
            bytes: written,
            message: "download complete".to_string(),
        })
    }

    fn emit_progress(&self, downloaded: u64) {
        self.events.emit(TransferEvent::DownloadProgress {
            destination: self.destination.clone(),
            downloaded,
            total: self.expected_total,
        });
    }

    async fn record_failure(&self, message: &str) {
        if let Some(log) = &self.error_log {
            log.append(message).await;
        }
    }

    fn set_phase(&mut self, phase: DownloadPhase) {
        self.phase = phase.clone();
        self.events.emit(TransferEvent::DownloadPhaseChanged {
            destination: self.destination.clone(),
            phase,
        });
    }

    fn fail(&mut self, err: TransferError) -> TransferError {
        error!("Download {} failed: {}", self.destination.display(), err);
        self.set_phase(DownloadPhase::Failed {
            reason: err.to_string(),
        });
        err
    }
}

/// Size of a leftover temporary file, 0 when there is none
async fn existing_len(path: &Path) -> Result<u64, TransferError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
        Ok(_) => Err(TransferError::InvalidDestination(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn validate_link(link: &str) -> Result<(), TransferError> {
    match url::Url::parse(link) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(TransferError::InvalidLink(link.to_string())),
    }
}
