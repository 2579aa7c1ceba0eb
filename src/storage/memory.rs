//! In-memory stores.
//!
//! These are real implementations, not mocks: desktop (single-process) mode
//! runs on them, and the test suite uses them as its fixtures.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use uuid::Uuid;

use crate::secret::{EncryptedSecret, SecretStore};
use crate::users::{LockoutStatus, UserAccount, UserStore};

#[derive(Default)]
pub struct MemoryUserStore {
    accounts: RwLock<HashMap<Uuid, UserAccount>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        let accounts = self.accounts.read().map_err(|_| anyhow!("poisoned lock"))?;
        Ok(accounts
            .values()
            .find(|account| account.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserAccount>> {
        let accounts = self.accounts.read().map_err(|_| anyhow!("poisoned lock"))?;
        Ok(accounts.get(&id).cloned())
    }

    async fn commit(&self, account: &UserAccount) -> Result<()> {
        let mut accounts = self.accounts.write().map_err(|_| anyhow!("poisoned lock"))?;
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn record_login_failure(&self, id: Uuid, max_attempts: i32) -> Result<LockoutStatus> {
        // The write lock makes the increment-and-relock a single atomic
        // step, mirroring the row lock the Postgres store relies on.
        let mut accounts = self.accounts.write().map_err(|_| anyhow!("poisoned lock"))?;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no such account: {id}"))?;
        account.login_attempts += 1;
        account.locked = max_attempts > 0 && account.login_attempts >= max_attempts as u32;
        Ok(LockoutStatus {
            login_attempts: account.login_attempts,
            locked: account.locked,
        })
    }

    async fn record_login_success(&self, id: Uuid) -> Result<()> {
        let mut accounts = self.accounts.write().map_err(|_| anyhow!("poisoned lock"))?;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no such account: {id}"))?;
        account.login_attempts = 0;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<(Uuid, Uuid), EncryptedSecret>>,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous insert for test fixtures.
    pub fn seed(&self, secret: EncryptedSecret) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert((secret.user_id, secret.server_id), secret);
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<EncryptedSecret>> {
        let secrets = self.secrets.read().map_err(|_| anyhow!("poisoned lock"))?;
        let mut owned: Vec<EncryptedSecret> = secrets
            .values()
            .filter(|secret| secret.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by_key(|secret| secret.server_id);
        Ok(owned)
    }

    async fn get(&self, user_id: Uuid, server_id: Uuid) -> Result<Option<EncryptedSecret>> {
        let secrets = self.secrets.read().map_err(|_| anyhow!("poisoned lock"))?;
        Ok(secrets.get(&(user_id, server_id)).cloned())
    }

    async fn upsert(&self, secret: &EncryptedSecret) -> Result<()> {
        let mut secrets = self.secrets.write().map_err(|_| anyhow!("poisoned lock"))?;
        secrets.insert((secret.user_id, secret.server_id), secret.clone());
        Ok(())
    }

    async fn remove(&self, user_id: Uuid, server_id: Uuid) -> Result<()> {
        let mut secrets = self.secrets.write().map_err(|_| anyhow!("poisoned lock"))?;
        secrets.remove(&(user_id, server_id));
        Ok(())
    }

    async fn remove_by_user(&self, user_id: Uuid) -> Result<()> {
        let mut secrets = self.secrets.write().map_err(|_| anyhow!("poisoned lock"))?;
        secrets.retain(|(owner, _), _| *owner != user_id);
        Ok(())
    }

    async fn replace_for_user(&self, user_id: Uuid, replacement: Vec<EncryptedSecret>) -> Result<()> {
        // One write lock for the whole swap keeps the batch atomic.
        let mut secrets = self.secrets.write().map_err(|_| anyhow!("poisoned lock"))?;
        secrets.retain(|(owner, _), _| *owner != user_id);
        for secret in replacement {
            secrets.insert((secret.user_id, secret.server_id), secret);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::source::SourceKind;

    #[tokio::test]
    async fn user_store_round_trips() {
        let store = MemoryUserStore::new();
        let account = UserAccount::new("ada", SourceKind::Internal);
        store.commit(&account).await.unwrap();

        let found = store.find_by_username("ada").await.unwrap().unwrap();
        assert_eq!(found.id, account.id);
        assert!(store.find_by_username("grace").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_on_unknown_account_errors() {
        let store = MemoryUserStore::new();
        assert!(store
            .record_login_failure(Uuid::new_v4(), 3)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn secret_store_scopes_by_user() {
        let store = MemorySecretStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.seed(EncryptedSecret::new(alice, Uuid::new_v4(), vec![1], 1));
        store.seed(EncryptedSecret::new(alice, Uuid::new_v4(), vec![2], 1));
        store.seed(EncryptedSecret::new(bob, Uuid::new_v4(), vec![3], 1));

        assert_eq!(store.list_by_user(alice).await.unwrap().len(), 2);
        store.remove_by_user(alice).await.unwrap();
        assert!(store.list_by_user(alice).await.unwrap().is_empty());
        assert_eq!(store.list_by_user(bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replace_for_user_swaps_the_full_set() {
        let store = MemorySecretStore::new();
        let user = Uuid::new_v4();
        let keep_out = Uuid::new_v4();
        store.seed(EncryptedSecret::new(user, Uuid::new_v4(), vec![1], 1));
        store.seed(EncryptedSecret::new(user, Uuid::new_v4(), vec![2], 1));
        store.seed(EncryptedSecret::new(keep_out, Uuid::new_v4(), vec![9], 1));

        let replacement = vec![EncryptedSecret::new(user, Uuid::new_v4(), vec![7], 2)];
        store.replace_for_user(user, replacement).await.unwrap();

        let after = store.list_by_user(user).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].ciphertext, vec![7]);
        assert_eq!(store.list_by_user(keep_out).await.unwrap().len(), 1);
    }
}
