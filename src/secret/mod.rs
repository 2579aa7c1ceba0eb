//! Encrypted per-server saved passwords.

pub mod crypto;
pub mod migration;
pub mod service;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One saved server password, encrypted under a specific key generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub user_id: Uuid,
    pub server_id: Uuid,
    /// `nonce || ciphertext`, see [`crypto`].
    pub ciphertext: Vec<u8>,
    /// Key generation this ciphertext was produced under. Must equal the
    /// resolved key's generation before the secret is decrypted.
    pub key_generation: u32,
    pub saved_at: DateTime<Utc>,
}

impl EncryptedSecret {
    #[must_use]
    pub fn new(user_id: Uuid, server_id: Uuid, ciphertext: Vec<u8>, key_generation: u32) -> Self {
        Self {
            user_id,
            server_id,
            ciphertext,
            key_generation,
            saved_at: Utc::now(),
        }
    }
}

/// Saved-password persistence, owned by the hosting application.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<EncryptedSecret>>;

    async fn get(&self, user_id: Uuid, server_id: Uuid) -> Result<Option<EncryptedSecret>>;

    async fn upsert(&self, secret: &EncryptedSecret) -> Result<()>;

    async fn remove(&self, user_id: Uuid, server_id: Uuid) -> Result<()>;

    async fn remove_by_user(&self, user_id: Uuid) -> Result<()>;

    /// Replaces the user's complete secret set in one transaction. Either
    /// every row in `secrets` is committed and every absent row removed, or
    /// nothing changes. Migration relies on this for its no-partial-mix
    /// guarantee.
    async fn replace_for_user(&self, user_id: Uuid, secrets: Vec<EncryptedSecret>) -> Result<()>;
}
