//! OS keyring access behind a tagged-error boundary.
//!
//! The rest of the crate never sees `keyring::Error`; platform failures are
//! folded into [`KeyringError`] here so key-resolution logic branches on
//! exactly three cases: locked (transient), no backend (permanent), other.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum KeyringError {
    /// The platform store exists but refused access (e.g. locked
    /// collection). Retry after the user unlocks it.
    #[error("OS keyring is locked")]
    Locked,

    /// No usable platform backend. Callers should stop consulting the
    /// keyring for the rest of the process.
    #[error("no OS keyring backend is available")]
    NoBackend,

    #[error("keyring failure: {0}")]
    Other(String),
}

impl From<keyring::Error> for KeyringError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoStorageAccess(e) => {
                debug!("keyring storage access refused: {e}");
                KeyringError::Locked
            }
            keyring::Error::PlatformFailure(e) => {
                debug!("keyring platform failure: {e}");
                KeyringError::NoBackend
            }
            other => KeyringError::Other(other.to_string()),
        }
    }
}

/// Minimal keyring capability consumed by the master-key manager.
pub trait KeyringBackend: Send + Sync {
    /// Returns the stored value, or `None` when no entry exists.
    fn get(&self, service: &str, user: &str) -> Result<Option<String>, KeyringError>;

    fn set(&self, service: &str, user: &str, value: &str) -> Result<(), KeyringError>;

    /// Removes the entry; removing a missing entry is not an error.
    fn delete(&self, service: &str, user: &str) -> Result<(), KeyringError>;
}

/// The real OS keyring (Keychain, Credential Manager, Secret Service).
#[derive(Debug, Default)]
pub struct OsKeyring;

impl OsKeyring {
    fn entry(service: &str, user: &str) -> Result<keyring::Entry, KeyringError> {
        keyring::Entry::new(service, user).map_err(KeyringError::from)
    }
}

impl KeyringBackend for OsKeyring {
    fn get(&self, service: &str, user: &str) -> Result<Option<String>, KeyringError> {
        let entry = Self::entry(service, user)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, service: &str, user: &str, value: &str) -> Result<(), KeyringError> {
        let entry = Self::entry(service, user)?;
        entry.set_password(value).map_err(KeyringError::from)
    }

    fn delete(&self, service: &str, user: &str) -> Result<(), KeyringError> {
        let entry = Self::entry(service, user)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory backend for tests and for single-process setups where no OS
/// keyring is wanted.
#[derive(Debug, Default)]
pub struct MemoryKeyring {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryKeyring {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyringBackend for MemoryKeyring {
    fn get(&self, service: &str, user: &str) -> Result<Option<String>, KeyringError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| KeyringError::Other("poisoned lock".to_string()))?;
        Ok(entries.get(&(service.to_string(), user.to_string())).cloned())
    }

    fn set(&self, service: &str, user: &str, value: &str) -> Result<(), KeyringError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| KeyringError::Other("poisoned lock".to_string()))?;
        entries.insert((service.to_string(), user.to_string()), value.to_string());
        Ok(())
    }

    fn delete(&self, service: &str, user: &str) -> Result<(), KeyringError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| KeyringError::Other("poisoned lock".to_string()))?;
        entries.remove(&(service.to_string(), user.to_string()));
        Ok(())
    }
}
