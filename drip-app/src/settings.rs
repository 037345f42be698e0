//! User settings persistence via TOML.
//!
//! Settings are stored at `<config_dir>/drip/settings.toml`.
//! Missing or corrupted config files return sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use drip_transfer::config::{MAX_RETRIES, RETRY_INTERVAL, RETRY_TIMEOUT};
use drip_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

/// User-configurable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory received files are written to.
    pub download_dir: PathBuf,
    /// Bytes per chunk message.
    pub chunk_size: u32,
    /// Seconds between retry sweeps.
    pub retry_interval_secs: u64,
    /// Seconds without an ack before a resend.
    pub retry_timeout_secs: u64,
    /// Resends allowed before a transfer is abandoned.
    pub max_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let download_dir = directories::ProjectDirs::from("", "", "drip")
            .map(|d| d.data_dir().join("downloads"))
            .unwrap_or_else(|| PathBuf::from("drip-downloads"));

        Self {
            download_dir,
            chunk_size: drip_files::CHUNK_SIZE,
            retry_interval_secs: RETRY_INTERVAL.as_secs(),
            retry_timeout_secs: RETRY_TIMEOUT.as_secs(),
            max_retries: MAX_RETRIES,
        }
    }
}

impl Settings {
    /// Load settings from the default config path.
    ///
    /// Returns defaults if the file doesn't exist or is corrupted.
    pub fn load() -> Self {
        Self::load_from_dir(Self::config_dir())
    }

    /// Save settings to the default config path.
    pub fn save(&self) -> Result<()> {
        self.save_to_dir(Self::config_dir())
    }

    /// Load settings from a specific config directory.
    pub fn load_from_dir(config_dir: PathBuf) -> Self {
        let path = config_dir.join("settings.toml");
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => {
                    tracing::info!(path = %path.display(), "settings loaded");
                    settings
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "corrupted settings file, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %path.display(),
                    "settings file not found, using defaults"
                );
                Self::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read settings file, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Save settings to a specific config directory.
    pub fn save_to_dir(&self, config_dir: PathBuf) -> Result<()> {
        std::fs::create_dir_all(&config_dir).with_context(|| {
            format!(
                "failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let path = config_dir.join("settings.toml");
        let contents = toml::to_string_pretty(self).context("failed to serialize settings")?;
        std::fs::write(&path, &contents)
            .with_context(|| format!("failed to write settings file: {}", path.display()))?;

        tracing::info!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Engine configuration described by these settings.
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            chunk_size: self.chunk_size,
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            retry_timeout: Duration::from_secs(self.retry_timeout_secs),
            max_retries: self.max_retries,
        }
    }

    /// Get the default config directory.
    pub fn config_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "drip")
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("drip-config"))
    }
}
