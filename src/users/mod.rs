//! User accounts and the account-store seam.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::source::SourceKind;

/// A provisioned user. Created at provisioning time, mutated by the login
/// protocol, never deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub username: String,
    /// Source this account was provisioned against.
    pub auth_source: SourceKind,
    pub login_attempts: u32,
    pub locked: bool,
    /// Argon2 PHC string; only Internal accounts carry one.
    pub password_hash: Option<String>,
    /// Serialized [`MasterPassCheck`], absent until a master key is first set.
    pub masterpass_check: Option<String>,
}

impl UserAccount {
    #[must_use]
    pub fn new(username: impl Into<String>, auth_source: SourceKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            auth_source,
            login_attempts: 0,
            locked: false,
            password_hash: None,
            masterpass_check: None,
        }
    }

    /// Parses the stored check blob, if any.
    ///
    /// # Errors
    /// Returns an error if the stored blob is not valid JSON.
    pub fn master_pass_check(&self) -> Result<Option<MasterPassCheck>> {
        self.masterpass_check
            .as_deref()
            .map(MasterPassCheck::decode)
            .transpose()
    }
}

/// The key generation plus the sentinel ciphertext, stored as one blob on
/// the account so the generation survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterPassCheck {
    pub generation: u32,
    /// Base64 of the sentinel ciphertext.
    pub check: String,
}

impl MasterPassCheck {
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize master password check")
    }

    /// # Errors
    /// Returns an error if the blob is not valid JSON.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to parse master password check")
    }
}

/// Result of an atomic failed-login update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutStatus {
    pub login_attempts: u32,
    pub locked: bool,
}

/// Account persistence, owned by the hosting application.
///
/// `record_login_failure` must be an atomic read-modify-write (row lock or
/// equivalent) so two concurrent attempts for the same account never lose
/// an increment.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>>;

    /// Persists the full account row, inserting it if new.
    async fn commit(&self, account: &UserAccount) -> Result<()>;

    /// Atomically increments `login_attempts` and re-derives `locked` from
    /// `max_attempts` (`<= 0` disables locking).
    async fn record_login_failure(&self, id: Uuid, max_attempts: i32) -> Result<LockoutStatus>;

    /// Resets `login_attempts` to 0. Does not touch `locked`.
    async fn record_login_success(&self, id: Uuid) -> Result<()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn check_blob_round_trips() {
        let blob = MasterPassCheck {
            generation: 4,
            check: "c2FsdXRvbg==".to_string(),
        };
        let encoded = blob.encode().unwrap();
        let decoded = MasterPassCheck::decode(&encoded).unwrap();
        assert_eq!(decoded.generation, 4);
        assert_eq!(decoded.check, blob.check);
    }

    #[test]
    fn account_without_check_parses_to_none() {
        let account = UserAccount::new("ada", SourceKind::Internal);
        assert!(account.master_pass_check().unwrap().is_none());
    }

    #[test]
    fn garbage_check_blob_is_an_error() {
        let mut account = UserAccount::new("ada", SourceKind::Internal);
        account.masterpass_check = Some("not-json".to_string());
        assert!(account.master_pass_check().is_err());
    }
}
