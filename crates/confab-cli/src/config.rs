//! CLI configuration file.
//!
//! `~/.config/confab/config.json` (platform-equivalent via `directories`)
//! holds the installation URL and the last session token. Command-line flags
//! always override file values.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::CliError;

/// Persisted CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Installation base URL.
    #[serde(default)]
    pub installation: Option<String>,
    /// Last `tw-auth` session token.
    #[serde(default)]
    pub auth: Option<String>,
}

impl CliConfig {
    /// Default config file path.
    ///
    /// # Errors
    ///
    /// [`CliError::NoConfigDir`] when the platform exposes no config dir.
    pub fn default_path() -> Result<PathBuf, CliError> {
        let dirs = ProjectDirs::from("com", "Confab", "confab").ok_or(CliError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.json"))
    }

    /// Load the config, returning defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// I/O and parse failures for an existing but unreadable file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(CliError::Io(e)),
        }
    }

    /// Write the config, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// I/O failures.
    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
