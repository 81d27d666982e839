//! Path management for vigil configuration files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/vigil/             # Config directory (or --config-dir)
//! ├── settings.toml            # AgentSettings
//! ├── agent.toml               # AgentRecord, written through RecordStore
//! └── logs/
//!     └── vigil.log.YYYY-MM-DD
//! ```

use std::path::{Path, PathBuf};
use vigil_core::{Result, VigilError};

const APP_DIR: &str = "vigil";

/// Resolved locations of every file the agent reads or writes.
#[derive(Debug, Clone)]
pub struct VigilPaths {
    root: PathBuf,
}

impl VigilPaths {
    /// Paths under an explicit root directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform config directory (e.g. `~/.config/vigil/`).
    pub fn platform_default() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| VigilError::config("Cannot find config directory"))?;
        Ok(Self::at(base.join(APP_DIR)))
    }

    /// `root` when given, the platform default otherwise.
    pub fn resolve(root: Option<&Path>) -> Result<Self> {
        match root {
            Some(root) => Ok(Self::at(root)),
            None => Self::platform_default(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.root
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.toml")
    }

    pub fn record_file(&self) -> PathBuf {
        self.root.join("agent.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}
