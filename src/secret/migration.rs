//! Bulk re-encryption of saved passwords when the master key changes.
//!
//! Two flavors share one engine:
//! - strict rotation, where the old key is known-correct: any undecryptable
//!   secret aborts the whole batch and the old generation stays
//!   authoritative;
//! - best-effort recovery, where the old key is only presumed (fresh
//!   keyring generation after a lost key): survivors advance, unreadable
//!   secrets are deleted, and total failure simply empties the cache.
//!
//! Both are idempotent: a secret already at the target generation is left
//! untouched, so re-running a migration never double-wraps anything.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::secret::crypto::{self, KeyMaterial};
use crate::secret::{EncryptedSecret, SecretStore};

/// Ids (per server) that advanced and ids that could not be decrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub migrated: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

/// Strict rotation from a known-correct old key.
///
/// # Errors
/// Returns [`Error::MigrationPartialFailure`] without committing anything
/// if any secret fails to decrypt under `old_key`; storage errors surface
/// as [`Error::Internal`] after the store has rolled the batch back.
pub async fn migrate(
    store: &Arc<dyn SecretStore>,
    user_id: Uuid,
    old_key: &KeyMaterial,
    new_key: &KeyMaterial,
    new_generation: u32,
) -> Result<MigrationOutcome, Error> {
    let (updated, outcome) = reencrypt_batch(
        store,
        user_id,
        Some(old_key),
        new_key,
        new_generation,
    )
    .await?;

    if !outcome.failed.is_empty() {
        warn!(
            user_id = %user_id,
            failed = outcome.failed.len(),
            "aborting key rotation: not every saved password could be re-encrypted"
        );
        return Err(Error::MigrationPartialFailure(outcome.failed));
    }

    store
        .replace_for_user(user_id, updated)
        .await
        .map_err(Error::Internal)?;

    info!(
        user_id = %user_id,
        migrated = outcome.migrated.len(),
        generation = new_generation,
        "saved passwords re-encrypted"
    );
    Ok(outcome)
}

/// Best-effort migration from a presumed old key. Unreadable secrets are
/// dropped rather than left stranded under a stale generation.
///
/// # Errors
/// Returns an error only on storage failure; decrypt failures are reported
/// in the outcome.
pub async fn migrate_best_effort(
    store: &Arc<dyn SecretStore>,
    user_id: Uuid,
    old_key: Option<&KeyMaterial>,
    new_key: &KeyMaterial,
    new_generation: u32,
) -> Result<MigrationOutcome, Error> {
    let (updated, outcome) =
        reencrypt_batch(store, user_id, old_key, new_key, new_generation).await?;

    store
        .replace_for_user(user_id, updated)
        .await
        .map_err(Error::Internal)?;

    if outcome.failed.is_empty() {
        info!(
            user_id = %user_id,
            migrated = outcome.migrated.len(),
            generation = new_generation,
            "saved passwords re-encrypted"
        );
    } else {
        warn!(
            user_id = %user_id,
            migrated = outcome.migrated.len(),
            dropped = outcome.failed.len(),
            "unreadable saved passwords were removed during key migration"
        );
    }
    Ok(outcome)
}

/// Decrypt/re-encrypt pass over the user's secrets. Returns the rows to
/// commit (survivors only) plus the outcome bookkeeping; nothing is written.
async fn reencrypt_batch(
    store: &Arc<dyn SecretStore>,
    user_id: Uuid,
    old_key: Option<&KeyMaterial>,
    new_key: &KeyMaterial,
    new_generation: u32,
) -> Result<(Vec<EncryptedSecret>, MigrationOutcome), Error> {
    let secrets = store.list_by_user(user_id).await.map_err(Error::Internal)?;

    let mut updated = Vec::with_capacity(secrets.len());
    let mut outcome = MigrationOutcome::default();

    for mut secret in secrets {
        if secret.key_generation == new_generation {
            // Already current; re-running a migration is a no-op.
            debug!(server_id = %secret.server_id, "secret already at target generation");
            outcome.migrated.push(secret.server_id);
            updated.push(secret);
            continue;
        }

        let plaintext = match old_key {
            Some(key) => crypto::decrypt(key, &secret.ciphertext, user_id, secret.server_id),
            None => Err(anyhow::anyhow!("old key unknown")),
        };

        match plaintext {
            Ok(plaintext) => {
                let ciphertext = crypto::encrypt(new_key, &plaintext, user_id, secret.server_id)
                    .map_err(Error::Internal)?;
                secret.ciphertext = ciphertext;
                secret.key_generation = new_generation;
                outcome.migrated.push(secret.server_id);
                updated.push(secret);
            }
            Err(err) => {
                debug!(server_id = %secret.server_id, "secret not decryptable under old key: {err}");
                outcome.failed.push(secret.server_id);
            }
        }
    }

    Ok((updated, outcome))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::secret::crypto::KEY_LEN;
    use crate::storage::memory::MemorySecretStore;

    fn store_with(
        user_id: Uuid,
        key: &KeyMaterial,
        generation: u32,
        count: usize,
    ) -> (Arc<dyn SecretStore>, Vec<Uuid>) {
        let store = MemorySecretStore::new();
        let mut ids = Vec::new();
        for i in 0..count {
            let server_id = Uuid::new_v4();
            let ciphertext =
                crypto::encrypt(key, format!("pass-{i}").as_bytes(), user_id, server_id).unwrap();
            store.seed(EncryptedSecret::new(user_id, server_id, ciphertext, generation));
            ids.push(server_id);
        }
        (Arc::new(store), ids)
    }

    #[tokio::test]
    async fn strict_migration_advances_every_secret() {
        let user_id = Uuid::new_v4();
        let old_key = KeyMaterial::new([1u8; KEY_LEN]);
        let new_key = KeyMaterial::new([2u8; KEY_LEN]);
        let (store, ids) = store_with(user_id, &old_key, 1, 3);

        let outcome = migrate(&store, user_id, &old_key, &new_key, 2).await.unwrap();
        assert_eq!(outcome.migrated.len(), 3);
        assert!(outcome.failed.is_empty());

        for secret in store.list_by_user(user_id).await.unwrap() {
            assert_eq!(secret.key_generation, 2);
            assert!(ids.contains(&secret.server_id));
            crypto::decrypt(&new_key, &secret.ciphertext, user_id, secret.server_id).unwrap();
        }
    }

    #[tokio::test]
    async fn strict_migration_is_idempotent() {
        let user_id = Uuid::new_v4();
        let old_key = KeyMaterial::new([1u8; KEY_LEN]);
        let new_key = KeyMaterial::new([2u8; KEY_LEN]);
        let (store, _ids) = store_with(user_id, &old_key, 1, 2);

        migrate(&store, user_id, &old_key, &new_key, 2).await.unwrap();
        let first = store.list_by_user(user_id).await.unwrap();

        // Second run: nothing is at generation 1 anymore, so every secret is
        // reported migrated and left byte-identical.
        let outcome = migrate(&store, user_id, &old_key, &new_key, 2).await.unwrap();
        assert_eq!(outcome.migrated.len(), 2);
        assert!(outcome.failed.is_empty());

        let second = store.list_by_user(user_id).await.unwrap();
        for secret in &second {
            let before = first
                .iter()
                .find(|s| s.server_id == secret.server_id)
                .unwrap();
            assert_eq!(before.ciphertext, secret.ciphertext);
            crypto::decrypt(&new_key, &secret.ciphertext, user_id, secret.server_id).unwrap();
        }
    }

    #[tokio::test]
    async fn strict_migration_aborts_on_partial_failure() {
        let user_id = Uuid::new_v4();
        let old_key = KeyMaterial::new([1u8; KEY_LEN]);
        let stray_key = KeyMaterial::new([9u8; KEY_LEN]);
        let new_key = KeyMaterial::new([2u8; KEY_LEN]);
        let (store, _ids) = store_with(user_id, &old_key, 1, 3);

        // Two extra secrets under an unrelated key.
        let (stranded, stray_ids) = {
            let mut stray_ids = Vec::new();
            for _ in 0..2 {
                let server_id = Uuid::new_v4();
                let ciphertext =
                    crypto::encrypt(&stray_key, b"lost", user_id, server_id).unwrap();
                store
                    .upsert(&EncryptedSecret::new(user_id, server_id, ciphertext, 1))
                    .await
                    .unwrap();
                stray_ids.push(server_id);
            }
            (2, stray_ids)
        };

        let err = migrate(&store, user_id, &old_key, &new_key, 2)
            .await
            .unwrap_err();
        match err {
            Error::MigrationPartialFailure(failed) => {
                assert_eq!(failed.len(), stranded);
                for id in &stray_ids {
                    assert!(failed.contains(id));
                }
            }
            other => panic!("expected MigrationPartialFailure, got {other:?}"),
        }

        // Nothing committed: every secret still at generation 1.
        for secret in store.list_by_user(user_id).await.unwrap() {
            assert_eq!(secret.key_generation, 1);
        }
    }

    #[tokio::test]
    async fn best_effort_migration_drops_unreadable_secrets() {
        let user_id = Uuid::new_v4();
        let old_key = KeyMaterial::new([1u8; KEY_LEN]);
        let stray_key = KeyMaterial::new([9u8; KEY_LEN]);
        let new_key = KeyMaterial::new([2u8; KEY_LEN]);
        let (store, _ids) = store_with(user_id, &old_key, 1, 3);
        for _ in 0..2 {
            let server_id = Uuid::new_v4();
            let ciphertext = crypto::encrypt(&stray_key, b"lost", user_id, server_id).unwrap();
            store
                .upsert(&EncryptedSecret::new(user_id, server_id, ciphertext, 1))
                .await
                .unwrap();
        }

        let outcome = migrate_best_effort(&store, user_id, Some(&old_key), &new_key, 2)
            .await
            .unwrap();
        assert_eq!(outcome.migrated.len(), 3);
        assert_eq!(outcome.failed.len(), 2);

        let remaining = store.list_by_user(user_id).await.unwrap();
        assert_eq!(remaining.len(), 3);
        for secret in remaining {
            assert_eq!(secret.key_generation, 2);
            crypto::decrypt(&new_key, &secret.ciphertext, user_id, secret.server_id).unwrap();
        }
    }

    #[tokio::test]
    async fn best_effort_with_unknown_old_key_empties_the_store() {
        let user_id = Uuid::new_v4();
        let old_key = KeyMaterial::new([1u8; KEY_LEN]);
        let new_key = KeyMaterial::new([2u8; KEY_LEN]);
        let (store, _ids) = store_with(user_id, &old_key, 1, 2);

        let outcome = migrate_best_effort(&store, user_id, None, &new_key, 2)
            .await
            .unwrap();
        assert!(outcome.migrated.is_empty());
        assert_eq!(outcome.failed.len(), 2);
        assert!(store.list_by_user(user_id).await.unwrap().is_empty());
    }
}
