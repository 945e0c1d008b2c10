//! Progress bar rendering for transfer events

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use pantransfer_types::{DownloadPhase, TransferEvent, UploadPhase};
use std::future::Future;
use tokio::sync::broadcast::{self, error::RecvError};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {msg:<12} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// A single progress bar following one transfer
pub struct TransferProgress {
    pb: ProgressBar,
}

impl TransferProgress {
    /// Hidden bars swallow every update, used for machine-readable output
    pub fn new(visible: bool) -> Self {
        let pb = ProgressBar::new(0);
        if !visible {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        if let Ok(bar_style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            pb.set_style(bar_style.progress_chars("█▓▒░  "));
        }
        Self { pb }
    }

    /// Update the bar from an event
    pub fn handle_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::HashProgress { hashed, total, .. } => {
                self.pb.set_message("hashing");
                self.pb.set_length(*total);
                self.pb.set_position(*hashed);
            }

            TransferEvent::UploadPhaseChanged { phase, .. } => match phase {
                UploadPhase::Precreated => {
                    self.pb.set_message("uploading");
                    self.pb.reset();
                }
                UploadPhase::Finalizing => self.pb.set_message("finalizing"),
                UploadPhase::Done => self.pb.finish_with_message(format!(
                    "{} Upload complete",
                    style("✓").green().bold()
                )),
                UploadPhase::Failed { reason } => self.pb.abandon_with_message(format!(
                    "{} Failed: {}",
                    style("✗").red().bold(),
                    reason
                )),
                _ => {}
            },

            TransferEvent::UploadProgress {
                uploaded, total, ..
            } => {
                self.pb.set_length(*total);
                self.pb.set_position(*uploaded);
            }

            TransferEvent::BlockUploaded { index, .. } => {
                self.pb.set_message(format!("block {}", index));
            }

            TransferEvent::AttemptStarted {
                attempt, offset, ..
            } => {
                if *attempt > 1 {
                    self.pb.println(format!(
                        "{} Retrying (attempt {}) from byte {}",
                        style("↻").yellow(),
                        attempt,
                        offset
                    ));
                }
                self.pb.set_message("downloading");
                self.pb.set_position(*offset);
            }

            TransferEvent::DownloadProgress {
                downloaded, total, ..
            } => {
                if let Some(total) = total {
                    self.pb.set_length(*total);
                }
                self.pb.set_position(*downloaded);
            }

            TransferEvent::DownloadPhaseChanged { phase, .. } => match phase {
                DownloadPhase::Done => self.pb.finish_with_message(format!(
                    "{} Download complete",
                    style("✓").green().bold()
                )),
                DownloadPhase::Failed { reason } => self.pb.abandon_with_message(format!(
                    "{} Failed: {}",
                    style("✗").red().bold(),
                    reason
                )),
                _ => {}
            },
        }
    }
}

/// Await a transfer while rendering the events it publishes
pub async fn drive<F, T>(
    transfer: F,
    mut events: broadcast::Receiver<TransferEvent>,
    progress: &TransferProgress,
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(transfer);
    let mut listening = true;

    loop {
        tokio::select! {
            biased;
            result = &mut transfer => {
                // Render whatever was published right before completion
                while let Ok(event) = events.try_recv() {
                    progress.handle_event(&event);
                }
                return result;
            }
            event = events.recv(), if listening => match event {
                Ok(event) => progress.handle_event(&event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => listening = false,
            },
        }
    }
}
