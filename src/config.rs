//! Configuration management
//!
//! Optional TOML file with store location, retention and transcript limits.
//! Every field has a default, so a missing file or a partial file both work.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::learning::store::{
    SignalStore, StoreOptions, DEFAULT_PRUNE_THRESHOLD_BYTES, DEFAULT_RETENTION_DAYS,
};
use crate::transcript::DEFAULT_MAX_ENTRIES;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Signal store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Transcript capture settings
    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Where signals live and how long they are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store directory; falls back to ~/.claude/reflections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    /// Age in days after which unprotected signals are archived on append
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Log size that triggers archival on append
    #[serde(default = "default_prune_threshold_bytes")]
    pub prune_threshold_bytes: u64,
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_prune_threshold_bytes() -> u64 {
    DEFAULT_PRUNE_THRESHOLD_BYTES
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            retention_days: default_retention_days(),
            prune_threshold_bytes: default_prune_threshold_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Most recent transcript entries examined by signal extraction
    #[serde(default = "default_max_transcript_entries")]
    pub max_transcript_entries: usize,
}

fn default_max_transcript_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_transcript_entries: default_max_transcript_entries(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, defaults when absent
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when it cannot be read
    ///
    /// Used on the hook path, which must never fail the host session.
    pub fn load_or_default() -> Self {
        match config_path() {
            Ok(path) => Self::load_or_default_from(&path),
            Err(e) => {
                warn!("Using default configuration: {:#}", e);
                Config::default()
            }
        }
    }

    pub fn load_or_default_from(path: &Path) -> Self {
        Self::load_from(path).unwrap_or_else(|e| {
            warn!("Using default configuration: {:#}", e);
            Config::default()
        })
    }

    /// Write configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Store directory: explicit argument, then config file, then the default
    pub fn resolve_base_dir(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(dir) = explicit {
            return Ok(dir.to_path_buf());
        }
        if let Some(dir) = &self.store.base_dir {
            return Ok(dir.clone());
        }
        default_base_dir()
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            retention_days: self.store.retention_days,
            prune_threshold_bytes: self.store.prune_threshold_bytes,
        }
    }

    /// Open the signal store this configuration points at
    pub fn open_store(&self, explicit: Option<&Path>) -> Result<SignalStore> {
        let base_dir = self.resolve_base_dir(explicit)?;
        Ok(SignalStore::with_options(base_dir, self.store_options()))
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "session-reflect", "session-reflect")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Default store directory, `~/.claude/reflections`
pub fn default_base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to locate home directory")?;
    Ok(home.join(".claude").join("reflections"))
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}
