//! Persistence for the minimal session state that survives a restart: the
//! refresh token, the uid it belongs to, and the server-assigned account
//! identifier. Nothing else leaves the process.

use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCredentials {
    pub refresh_token: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedCredentials>, AuthError>;
    fn save(&self, credentials: &PersistedCredentials) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// In-memory store. Sessions do not survive the process; useful for tests and
/// for embedders that manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<PersistedCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<PersistedCredentials>, AuthError> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, credentials: &PersistedCredentials) -> Result<(), AuthError> {
        *self.inner.lock() = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.inner.lock() = None;
        Ok(())
    }
}

/// JSON-file-backed store.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<PersistedCredentials>, AuthError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let credentials = serde_json::from_str(&text)?;
        Ok(Some(credentials))
    }

    fn save(&self, credentials: &PersistedCredentials) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(credentials)?;
        fs::write(&self.path, text)?;
        debug!(path = %self.path.display(), "persisted session credentials");
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
