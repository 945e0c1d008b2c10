//! Transfer engine
//!
//! - Multipart upload: precreate, blocks in server order, finalize
//! - Resumable download: range requests into a temporary file, atomic rename
//! - Optional append-only error log next to the destination
//!
//! Sessions run sequentially on the caller's task. Nothing is spawned.

mod download;
mod error_log;
mod upload;

pub use download::*;
pub use error_log::*;
pub use upload::*;

use pantransfer_types::TransferEvent;
use tokio::sync::broadcast;

/// Optional event publisher shared by sessions
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<broadcast::Sender<TransferEvent>>,
}

impl EventSink {
    pub fn new(tx: broadcast::Sender<TransferEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self { tx: None }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
