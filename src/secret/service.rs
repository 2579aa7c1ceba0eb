//! Saving and recalling per-server passwords under the resolved key.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::Error;
use crate::masterkey::MasterKeyState;
use crate::secret::crypto;
use crate::secret::{EncryptedSecret, SecretStore};

/// The consumer side of the encrypted store: what the connection layer
/// calls when a user opts to save, reuse or forget a server password.
#[derive(Clone)]
pub struct SavedPasswordService {
    secrets: Arc<dyn SecretStore>,
}

impl SavedPasswordService {
    #[must_use]
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    /// Encrypts and stores one server password under the current key.
    ///
    /// # Errors
    /// Returns an error if encryption or the store write fails.
    #[instrument(skip_all, fields(user_id = %user_id, server_id = %server_id))]
    pub async fn save(
        &self,
        state: &MasterKeyState,
        user_id: Uuid,
        server_id: Uuid,
        password: &SecretString,
    ) -> Result<(), Error> {
        let ciphertext = crypto::encrypt(
            state.key(),
            password.expose_secret().as_bytes(),
            user_id,
            server_id,
        )?;
        let secret = EncryptedSecret::new(user_id, server_id, ciphertext, state.generation());
        self.secrets.upsert(&secret).await.map_err(Error::Internal)?;
        debug!("saved server password");
        Ok(())
    }

    /// Recalls a saved server password.
    ///
    /// Enforces the generation invariant: a secret under any other
    /// generation than the resolved key's is never decrypted, it is
    /// reported as stale so the caller migrates first.
    ///
    /// # Errors
    /// `StaleKeyGeneration` on a generation mismatch;
    /// `IncorrectMasterPassword` if the ciphertext does not open under the
    /// resolved key.
    #[instrument(skip_all, fields(user_id = %user_id, server_id = %server_id))]
    pub async fn lookup(
        &self,
        state: &MasterKeyState,
        user_id: Uuid,
        server_id: Uuid,
    ) -> Result<Option<SecretString>, Error> {
        let Some(secret) = self
            .secrets
            .get(user_id, server_id)
            .await
            .map_err(Error::Internal)?
        else {
            return Ok(None);
        };

        if secret.key_generation != state.generation() {
            return Err(Error::StaleKeyGeneration {
                found: secret.key_generation,
                current: state.generation(),
            });
        }

        let plaintext = crypto::decrypt(state.key(), &secret.ciphertext, user_id, server_id)
            .map_err(|_| Error::IncorrectMasterPassword)?;
        match String::from_utf8(plaintext) {
            Ok(password) => Ok(Some(SecretString::from(password))),
            Err(err) => {
                let mut bytes = err.into_bytes();
                bytes.zeroize();
                Err(Error::Internal(anyhow::anyhow!(
                    "saved password is not valid UTF-8"
                )))
            }
        }
    }

    /// Forgets one saved password.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    pub async fn remove(&self, user_id: Uuid, server_id: Uuid) -> Result<(), Error> {
        self.secrets
            .remove(user_id, server_id)
            .await
            .map_err(Error::Internal)
    }

    /// Forgets every saved password for the user; used when keyring trust
    /// is revoked or the account is cleaned up.
    ///
    /// # Errors
    /// Returns an error if the store write fails.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn remove_saved_passwords(&self, user_id: Uuid) -> Result<(), Error> {
        self.secrets
            .remove_by_user(user_id)
            .await
            .map_err(Error::Internal)
    }
}
