//! Error taxonomy for the authentication chain and master-key subsystem.
//!
//! Validation and authentication failures are user-facing and retryable.
//! `AccountLocked` is always surfaced distinctly, never downgraded to a
//! generic failure. Keyring errors split into a transient flavor
//! (`KeyringLocked`) and a permanent one (`KeyringUnavailable`) that turns
//! OS secret storage off for the rest of the process.

use thiserror::Error;
use uuid::Uuid;

use crate::auth::source::SourceKind;

/// Credential form field an error is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Username,
    Password,
    Other,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Username => write!(f, "username"),
            Self::Password => write!(f, "password"),
            Self::Other => write!(f, "field"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// A source rejected the submitted form fields before any identity check.
    #[error("{field}: {message}")]
    Validation { field: Field, message: String },

    /// The identity check itself failed.
    #[error("authentication failed ({kind}): {message}")]
    Authentication { kind: SourceKind, message: String },

    /// Too many consecutive failed logins; rejected before authentication.
    #[error("account locked after too many failed login attempts")]
    AccountLocked,

    /// The OS keyring exists but refused access; retry after unlocking.
    #[error("OS keyring is locked")]
    KeyringLocked,

    /// No usable OS keyring backend; OS secret storage is now disabled.
    #[error("no OS keyring backend is available")]
    KeyringUnavailable,

    #[error("master password hook failed: {0}")]
    HookFailure(String),

    /// Re-encryption could not advance every saved password; the old key
    /// generation remains authoritative.
    #[error("re-encryption failed for {} saved password(s)", .0.len())]
    MigrationPartialFailure(Vec<Uuid>),

    /// The candidate key did not match the stored check text.
    #[error("incorrect master password")]
    IncorrectMasterPassword,

    /// A saved password is still under an older key generation and must be
    /// migrated before it can be decrypted.
    #[error("saved password is under key generation {found}, current is {current}")]
    StaleKeyGeneration { found: u32, current: u32 },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn validation(field: Field, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn authentication(source: SourceKind, message: impl Into<String>) -> Self {
        Self::Authentication {
            kind: source,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
