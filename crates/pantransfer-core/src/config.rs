//! Settings persistence (a single JSON file)

use crate::error::TransferError;
use pantransfer_types::Settings;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const SETTINGS_FILE: &str = "settings.json";

/// Reads and writes `settings.json` in a config directory
#[derive(Clone, Debug)]
pub struct SettingsStore {
    config_dir: PathBuf,
}

impl SettingsStore {
    pub fn new(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// `<config_dir>/pantransfer`, falling back to the working directory
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pantransfer")
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    /// Load settings; a missing file yields the defaults
    pub async fn load(&self) -> Result<Settings, TransferError> {
        let path = self.settings_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", path.display());
                return Ok(Settings::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content)
            .map_err(|e| TransferError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save settings, creating the directory if needed
    pub async fn save(&self, settings: &Settings) -> Result<(), TransferError> {
        fs::create_dir_all(&self.config_dir).await?;

        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| TransferError::Config(e.to_string()))?;
        fs::write(self.settings_path(), content).await?;

        debug!("Saved settings to {}", self.settings_path().display());
        Ok(())
    }

    /// Remove the settings file so the next load returns defaults
    pub async fn reset(&self) -> Result<(), TransferError> {
        match fs::remove_file(self.settings_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
