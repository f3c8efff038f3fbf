//! Repository configuration via `confdb.toml`
//!
//! A redb repository directory carries a `confdb.toml`; on first open a
//! commented default file is written. Edit it and reopen to change
//! settings. In-memory backends use [`ConfdbConfig::default`].

use crate::{Result, StorageError};
use confdb_core::DispatcherConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed in the repository directory.
pub const CONFIG_FILE_NAME: &str = "confdb.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfdbConfig {
    /// Worker threads delivering change notifications.
    #[serde(default = "default_notify_workers")]
    pub notify_workers: usize,
    /// Undelivered batches, across all subscribers, before new ones are refused.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Reload storage units changed by other processes.
    #[serde(default = "default_watch")]
    pub watch: bool,
    /// Commit author when no credentials were set.
    #[serde(default = "default_author")]
    pub default_author: String,
}

fn default_notify_workers() -> usize {
    2
}

fn default_max_queue_depth() -> usize {
    1024
}

fn default_watch() -> bool {
    true
}

fn default_author() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

impl Default for ConfdbConfig {
    fn default() -> Self {
        Self {
            notify_workers: default_notify_workers(),
            max_queue_depth: default_max_queue_depth(),
            watch: default_watch(),
            default_author: default_author(),
        }
    }
}

impl ConfdbConfig {
    /// Settings of the facade's notification dispatcher
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.notify_workers,
            max_queue_depth: self.max_queue_depth,
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# confdb repository configuration
#
# Worker threads delivering change notifications (default: 2)
notify_workers = 2

# Undelivered notification batches, across all subscribers, before new
# ones are refused (default: 1024)
max_queue_depth = 1024

# Reload storage units changed by other processes (default: true)
watch = true

# Commit author used when no commit credentials are set
# (default: the USER environment variable)
# default_author = "operator"
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConfdbConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Config of a repository directory, creating the default file first
    pub fn load_or_init(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        Self::write_default_if_missing(&path)?;
        Self::from_file(&path)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.notify_workers == 0 {
            return Err(StorageError::InvalidConfig("notify_workers must be at least 1".into()));
        }
        if self.max_queue_depth == 0 {
            return Err(StorageError::InvalidConfig("max_queue_depth must be at least 1".into()));
        }
        Ok(())
    }
}
