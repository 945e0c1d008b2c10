//! Append-only failure log kept next to a download destination

use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Suffix of the temporary file a download writes into
pub const TEMP_SUFFIX: &str = "_pttmp";

/// Suffix of the error log written next to a destination
pub const ERROR_LOG_SUFFIX: &str = "_pttmp_ErrorLog.txt";

/// `<destination>_pttmp`
pub fn temp_path_for(destination: &Path) -> PathBuf {
    with_suffix(destination, TEMP_SUFFIX)
}

/// `<destination>_pttmp_ErrorLog.txt`
pub fn error_log_path_for(destination: &Path) -> PathBuf {
    with_suffix(destination, ERROR_LOG_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// One `<timestamp>: <message>` line per failure
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn for_destination(destination: &Path) -> Self {
        Self {
            path: error_log_path_for(destination),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a line. Logging failures are reported through tracing only.
    pub async fn append(&self, message: &str) {
        let line = format!("{}: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S%.6f"), message);
        let result = async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!("Could not write error log {}: {}", self.path.display(), e);
        }
    }
}
