//! Serialized session cache.
//!
//! A JSON file keyed by user id:
//!
//! ```json
//! {
//!   "139099": {
//!     "user": {"api": {"installation": "https://…", "auth": "tw-auth…"}},
//!     "rooms": [ … ],
//!     "people": [ … ]
//!   }
//! }
//! ```
//!
//! The core treats the `rooms`/`people` blobs as opaque; the CLI uses the
//! `user.api` block to skip re-login.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CliError;

/// One user's cached session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedSession {
    /// API access block.
    #[serde(default)]
    pub user: CachedUser,
    /// Opaque room snapshots.
    #[serde(default)]
    pub rooms: Vec<Value>,
    /// Opaque people snapshots.
    #[serde(default)]
    pub people: Vec<Value>,
}

/// The `user` block of a cached session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedUser {
    /// API endpoint + token.
    #[serde(default)]
    pub api: CachedApi,
}

/// Installation and token pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedApi {
    /// Installation base URL.
    #[serde(default)]
    pub installation: Option<String>,
    /// `tw-auth` token.
    #[serde(default)]
    pub auth: Option<String>,
}

/// On-disk session cache, keyed by user id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStore(BTreeMap<String, CachedSession>);

impl SessionStore {
    /// Default cache file path.
    ///
    /// # Errors
    ///
    /// [`CliError::NoConfigDir`] when the platform exposes no config dir.
    pub fn default_path() -> Result<PathBuf, CliError> {
        let dirs = ProjectDirs::from("com", "Confab", "confab").ok_or(CliError::NoConfigDir)?;
        Ok(dirs.config_dir().join("sessions.json"))
    }

    /// Load the store, returning an empty one when the file does not exist.
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

    /// Write the store, creating parent directories as needed.
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

    /// Cached session for a user.
    #[must_use]
    pub fn get(&self, user_id: u64) -> Option<&CachedSession> {
        self.0.get(&user_id.to_string())
    }

    /// Store a user's installation + token pair.
    pub fn record_login(&mut self, user_id: u64, installation: &str, auth: &str) {
        let entry = self.0.entry(user_id.to_string()).or_default();
        entry.user.api.installation = Some(installation.to_string());
        entry.user.api.auth = Some(auth.to_string());
    }

    /// Any cached installation + token pair, newest user id first.
    #[must_use]
    pub fn any_login(&self) -> Option<(String, String)> {
        self.0.values().rev().find_map(|session| {
            let api = &session.user.api;
            match (&api.installation, &api.auth) {
                (Some(installation), Some(auth)) => {
                    Some((installation.clone(), auth.clone()))
                }
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let mut store = SessionStore::default();
        store.record_login(139_099, "https://digitalcrew.teamwork.com", "tok-1");
        store.save(&path).unwrap();

        let loaded = SessionStore::load(&path).unwrap();
        let session = loaded.get(139_099).unwrap();
        assert_eq!(session.user.api.auth.as_deref(), Some("tok-1"));
        assert_eq!(loaded.any_login().unwrap().1, "tok-1");
    }

    #[test]
    fn unknown_layout_fields_survive_via_defaults() {
        let parsed: SessionStore = serde_json::from_str(
            r#"{"7": {"user": {"api": {"installation": "https://x.test"}}, "rooms": [{"id": 1}]}}"#,
        )
        .unwrap();
        let session = parsed.get(7).unwrap();
        assert_eq!(session.rooms.len(), 1);
        assert!(session.user.api.auth.is_none());
        assert!(parsed.any_login().is_none());
    }
}
