//! Sidebar configuration snapshot and the sources it can be loaded from.
//!
//! A snapshot is immutable once loaded; reloading produces a fresh one which
//! the engine swaps in wholesale.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;

pub const MAX_TITLE_LEN: usize = 32;
pub const MIN_UPDATE_INTERVAL: u64 = 1;
pub const MAX_UPDATE_INTERVAL: u64 = 1200;
pub const MAX_LINES: usize = 15;

/// Errors raised while loading or validating a configuration snapshot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config JSON failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SidebarConfig {
    /// Global kill switch.
    pub enabled: bool,
    /// Title template, supports markup codes and placeholders.
    pub title: String,
    /// Refresh period in host ticks.
    pub update_interval: u64,
    /// Line templates, top to bottom.
    pub lines: Vec<String>,
    /// Worlds in which the sidebar is never shown.
    pub world_blacklist: BTreeSet<String>,
    /// Used for users without a stored preference.
    pub default_enabled: bool,
}

impl Default for SidebarConfig {
    fn default() -> Self {
        let lines = [
            "&7Welcome, &f%player_name%",
            "",
            "&eOnline: &f%server_online%/%server_max_players%",
            "&eWorld: &f%world_name%",
            "",
            "&eCoins: &f%vault_eco_balance_formatted%",
            "&ePing: &f%player_ping%ms",
            "",
            "&7Server time",
            "&f%server_time_hh:mm:ss%",
            "",
            "&6play.example.com",
        ];

        Self {
            enabled: true,
            title: "&6&lMy Server".to_string(),
            update_interval: 20,
            lines: lines.iter().map(|l| l.to_string()).collect(),
            world_blacklist: BTreeSet::from(["world_event".to_string()]),
            default_enabled: true,
        }
    }
}

impl SidebarConfig {
    /// Checks the bounds the rest of the engine relies on.
    ///
    /// Blank lines are accepted: they are the usual way to draw separators.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let title_len = self.title.chars().count();
        if title_len == 0 || title_len > MAX_TITLE_LEN {
            return Err(ConfigError::invalid(format!(
                "title must be 1..={} characters, got {}",
                MAX_TITLE_LEN, title_len
            )));
        }

        if !(MIN_UPDATE_INTERVAL..=MAX_UPDATE_INTERVAL).contains(&self.update_interval) {
            return Err(ConfigError::invalid(format!(
                "update-interval must be {}..={}, got {}",
                MIN_UPDATE_INTERVAL, MAX_UPDATE_INTERVAL, self.update_interval
            )));
        }

        if self.lines.is_empty() || self.lines.len() > MAX_LINES {
            return Err(ConfigError::invalid(format!(
                "lines must hold 1..={} entries, got {}",
                MAX_LINES,
                self.lines.len()
            )));
        }

        Ok(())
    }

    pub fn is_blacklisted(&self, location: &str) -> bool {
        self.world_blacklist.contains(location)
    }

    /// Refresh period as wall-clock time.
    pub fn update_period(&self) -> Duration {
        crate::ticks_to_duration(self.update_interval)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SidebarConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

/// Where the engine gets its configuration from.
///
/// `poll_change` is called periodically; a source that noticed an update
/// returns the freshly loaded snapshot (or the error loading it produced).
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<SidebarConfig, ConfigError>;

    fn poll_change(&self) -> Option<Result<SidebarConfig, ConfigError>> {
        None
    }
}

/// JSON file on disk. A missing file is created with the defaults.
pub struct JsonConfigFile {
    path: PathBuf,
    last_modified: Mutex<Option<SystemTime>>,
}

impl JsonConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn write_defaults(&self) -> Result<SidebarConfig, ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let config = SidebarConfig::default();
        fs::write(&self.path, serde_json::to_string_pretty(&config)?)?;
        info!("Wrote default sidebar config to {}", self.path.display());
        Ok(config)
    }
}

impl ConfigSource for JsonConfigFile {
    fn load(&self) -> Result<SidebarConfig, ConfigError> {
        let config = if self.path.exists() {
            SidebarConfig::from_json(&fs::read_to_string(&self.path)?)?
        } else {
            self.write_defaults()?
        };

        if let Ok(mut last) = self.last_modified.lock() {
            *last = self.modified();
        }
        Ok(config)
    }

    fn poll_change(&self) -> Option<Result<SidebarConfig, ConfigError>> {
        let current = self.modified()?;
        let mut last = match self.last_modified.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *last == Some(current) {
            return None;
        }
        // Recorded before parsing so a broken file is reported once, not on
        // every poll.
        *last = Some(current);
        drop(last);

        Some(self.load())
    }
}

/// Configuration held in memory, for embedders that manage their own files.
pub struct MemoryConfig {
    config: RwLock<SidebarConfig>,
    dirty: AtomicBool,
}

impl MemoryConfig {
    pub fn new(config: SidebarConfig) -> Self {
        Self {
            config: RwLock::new(config),
            dirty: AtomicBool::new(false),
        }
    }

    /// Replaces the snapshot; the next `poll_change` reports it.
    pub fn set(&self, config: SidebarConfig) {
        if let Ok(mut current) = self.config.write() {
            *current = config;
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    fn snapshot(&self) -> SidebarConfig {
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new(SidebarConfig::default())
    }
}

impl ConfigSource for MemoryConfig {
    fn load(&self) -> Result<SidebarConfig, ConfigError> {
        let config = self.snapshot();
        config.validate()?;
        Ok(config)
    }

    fn poll_change(&self) -> Option<Result<SidebarConfig, ConfigError>> {
        if self.dirty.swap(false, Ordering::SeqCst) {
            Some(self.load())
        } else {
            None
        }
    }
}
