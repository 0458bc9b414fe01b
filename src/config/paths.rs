//! Path resolution for studysync configuration and data files.
//!
//! All studysync data is stored in `~/.studysync/` (or `$STUDYSYNC_HOME`):
//! - `config.yaml` - Main configuration file
//! - `queue.db` - SQLite queue store for pending operations

use std::path::PathBuf;

use crate::error::StudySyncError;

/// Environment variable that overrides the data root.
pub const HOME_ENV: &str = "STUDYSYNC_HOME";

/// Paths to studysync configuration and data files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.studysync/`
    pub root: PathBuf,
    /// Config file: `~/.studysync/config.yaml`
    pub config_file: PathBuf,
    /// Queue store: `~/.studysync/queue.db`
    pub database: PathBuf,
}

impl Paths {
    /// Resolve paths from `$STUDYSYNC_HOME`, falling back to the home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if neither variable is set.
    pub fn new() -> Result<Self, StudySyncError> {
        if let Ok(root) = std::env::var(HOME_ENV) {
            if !root.is_empty() {
                return Ok(Self::with_root(PathBuf::from(root)));
            }
        }

        let home = std::env::var("HOME").map_err(|_| {
            StudySyncError::Config("Could not determine home directory".to_string())
        })?;

        Ok(Self::with_root(PathBuf::from(home).join(".studysync")))
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("queue.db"),
            root,
        }
    }

    /// Ensure the data directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), StudySyncError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                StudySyncError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }
        Ok(())
    }
}
