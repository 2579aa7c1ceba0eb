//! Master-key resolution, validation and rotation.
//!
//! The master key encrypts every saved server password for a user. It lives
//! only in volatile memory: the manager may hand a generated passphrase to
//! the OS keyring (an external opaque store) but never writes key material
//! to application storage or logs.
//!
//! Resolution ladder for one scope: existing state, OS keyring (desktop
//! only), fresh keyring generation with best-effort migration, configured
//! hook, explicitly submitted password, and finally "ask the user".

pub mod check_text;
pub mod hook;
pub mod keyring;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::Error;
use crate::masterkey::hook::HookRunner;
use crate::masterkey::keyring::{KeyringBackend, KeyringError};
use crate::secret::crypto::{self, KeyMaterial};
use crate::secret::migration::{self, MigrationOutcome};
use crate::secret::SecretStore;
use crate::users::{MasterPassCheck, UserAccount, UserStore};

use base64ct::{Base64, Encoding};

/// Where the currently resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    UserEntered,
    OsKeyring,
    Hook,
}

/// The resolved key for one scope. Never serialized; `Debug` is redacted.
pub struct MasterKeyState {
    key: KeyMaterial,
    origin: KeyOrigin,
    generation: u32,
}

impl MasterKeyState {
    #[must_use]
    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    #[must_use]
    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Debug for MasterKeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeyState")
            .field("key", &"***")
            .field("origin", &self.origin)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Outcome of a resolution pass that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyResolution {
    Resolved,
    /// No source produced a key; the caller must prompt for a password.
    NeedsUserInput,
}

/// Process-wide kill-switch for OS secret storage. Flipped off permanently
/// when the keyring reports no usable backend, so no later resolution in
/// the same process touches the keyring again.
#[derive(Clone, Debug)]
pub struct OsStorageSwitch {
    disabled: Arc<AtomicBool>,
}

impl OsStorageSwitch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            disabled: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }
}

impl Default for OsStorageSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-scope master-key manager: one per authenticated session in server
/// mode, one per process in desktop mode. Holding it per session is what
/// keeps one user's key out of every other user's reach.
pub struct MasterKeyManager {
    config: Config,
    users: Arc<dyn UserStore>,
    secrets: Arc<dyn SecretStore>,
    keyring: Arc<dyn KeyringBackend>,
    hook: Arc<dyn HookRunner>,
    os_storage: OsStorageSwitch,
    state: Option<MasterKeyState>,
}

impl MasterKeyManager {
    #[must_use]
    pub fn new(
        config: Config,
        users: Arc<dyn UserStore>,
        secrets: Arc<dyn SecretStore>,
        keyring: Arc<dyn KeyringBackend>,
        hook: Arc<dyn HookRunner>,
        os_storage: OsStorageSwitch,
    ) -> Self {
        Self {
            config,
            users,
            secrets,
            keyring,
            hook,
            os_storage,
            state: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> Option<&MasterKeyState> {
        self.state.as_ref()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state.is_some()
    }

    /// Drops the in-memory key, e.g. on logout.
    pub fn clear(&mut self) {
        self.state = None;
    }

    fn keyring_in_play(&self) -> bool {
        self.config.use_os_secret_storage()
            && !self.config.server_mode()
            && self.os_storage.is_enabled()
    }

    /// Runs the resolution ladder for `account`.
    ///
    /// `submitted` is a password the user just supplied, if any. In keyring
    /// mode it is only used as the presumptive old key when a fresh keyring
    /// key replaces a lost one; otherwise it is adopted directly.
    ///
    /// # Errors
    /// `KeyringLocked` is transient and leaves OS storage enabled;
    /// `KeyringUnavailable` means OS storage was just permanently disabled
    /// and no fallback source was available; `IncorrectMasterPassword`
    /// means the candidate failed the check-text validation.
    #[instrument(skip_all, fields(user = %account.username))]
    pub async fn resolve(
        &mut self,
        account: &mut UserAccount,
        submitted: Option<&SecretString>,
    ) -> Result<KeyResolution, Error> {
        if self.state.is_some() {
            return Ok(KeyResolution::Resolved);
        }

        if self.keyring_in_play() {
            match self.keyring_get(account).await {
                Ok(Some(passphrase)) => {
                    let passphrase = SecretString::from(passphrase);
                    self.adopt(account, &passphrase, KeyOrigin::OsKeyring).await?;
                    return Ok(KeyResolution::Resolved);
                }
                Ok(None) => {
                    self.regenerate_keyring_key(account, submitted).await?;
                    return Ok(KeyResolution::Resolved);
                }
                Err(KeyringError::Locked) => {
                    // Transient: the feature stays enabled, the caller
                    // retries once the keyring is unlocked.
                    return Err(Error::KeyringLocked);
                }
                Err(err) => {
                    warn!("disabling OS secret storage: {err}");
                    self.os_storage.disable();
                    self.state = None;
                    if self.config.master_password_hook().is_none() && submitted.is_none() {
                        return Err(Error::KeyringUnavailable);
                    }
                    // Fall through to the hook/prompt path below.
                }
            }
        }

        if let Some(command) = self.config.master_password_hook() {
            let output = self
                .hook
                .run(command)
                .await
                .map_err(|e| Error::HookFailure(e.to_string()))?;
            if !output.is_empty() {
                let passphrase = SecretString::from(output);
                self.adopt(account, &passphrase, KeyOrigin::Hook).await?;
                return Ok(KeyResolution::Resolved);
            }
            debug!("master password hook produced no output");
        }

        match submitted {
            Some(passphrase) => {
                self.adopt(account, passphrase, KeyOrigin::UserEntered).await?;
                Ok(KeyResolution::Resolved)
            }
            None => Ok(KeyResolution::NeedsUserInput),
        }
    }

    /// Adopts a candidate passphrase: derives the key, proves it against the
    /// stored check text (or initializes the check on first use), and only
    /// then trusts it.
    async fn adopt(
        &mut self,
        account: &mut UserAccount,
        passphrase: &SecretString,
        origin: KeyOrigin,
    ) -> Result<(), Error> {
        let key = crypto::derive_key(passphrase.expose_secret(), account.id)?;

        match account.master_pass_check()? {
            Some(blob) => {
                let stored = Base64::decode_vec(&blob.check)
                    .map_err(|e| Error::Internal(anyhow::anyhow!("corrupt check blob: {e}")))?;
                if !check_text::validate(&key, account.id, &stored) {
                    return Err(Error::IncorrectMasterPassword);
                }
                self.state = Some(MasterKeyState {
                    key,
                    origin,
                    generation: blob.generation,
                });
            }
            None => {
                let generation = 1;
                self.write_check(account, &key, generation).await?;
                info!("master password set");
                self.state = Some(MasterKeyState {
                    key,
                    origin,
                    generation,
                });
            }
        }
        Ok(())
    }

    /// No key in the keyring yet: generate one, file it, and carry over
    /// whatever secrets the password the user just submitted can still
    /// decrypt. Unreadable leftovers are dropped so the cache starts clean.
    async fn regenerate_keyring_key(
        &mut self,
        account: &mut UserAccount,
        submitted: Option<&SecretString>,
    ) -> Result<(), Error> {
        let passphrase = crypto::generate_passphrase();
        self.keyring_set(account, &passphrase).await.map_err(|err| match err {
            KeyringError::Locked => Error::KeyringLocked,
            err => {
                warn!("disabling OS secret storage: {err}");
                self.os_storage.disable();
                Error::KeyringUnavailable
            }
        })?;

        let new_key = crypto::derive_key(&passphrase, account.id)?;
        let old_generation = account
            .master_pass_check()?
            .map(|blob| blob.generation)
            .unwrap_or(0);
        let new_generation = old_generation + 1;

        let old_key = submitted
            .map(|p| crypto::derive_key(p.expose_secret(), account.id))
            .transpose()?;

        migration::migrate_best_effort(
            &self.secrets,
            account.id,
            old_key.as_ref(),
            &new_key,
            new_generation,
        )
        .await?;

        self.write_check(account, &new_key, new_generation).await?;
        info!("generated fresh OS keyring key");
        self.state = Some(MasterKeyState {
            key: new_key,
            origin: KeyOrigin::OsKeyring,
            generation: new_generation,
        });
        Ok(())
    }

    /// Re-encrypts every saved password under a key derived from
    /// `new_passphrase`, then swaps the check text and the in-memory state.
    /// The migration commits before success is reported; a partial failure
    /// leaves the old generation authoritative.
    ///
    /// # Errors
    /// `IncorrectMasterPassword` style failures cannot happen here (the old
    /// key is the resolved one); `MigrationPartialFailure` aborts the
    /// rotation.
    #[instrument(skip_all, fields(user = %account.username))]
    pub async fn rotate(
        &mut self,
        account: &mut UserAccount,
        new_passphrase: &SecretString,
    ) -> Result<MigrationOutcome, Error> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("no master key resolved")))?;

        let new_key = crypto::derive_key(new_passphrase.expose_secret(), account.id)?;
        let new_generation = state.generation + 1;

        let outcome = migration::migrate(
            &self.secrets,
            account.id,
            &state.key,
            &new_key,
            new_generation,
        )
        .await?;

        self.write_check(account, &new_key, new_generation).await?;
        info!(generation = new_generation, "master password rotated");
        self.state = Some(MasterKeyState {
            key: new_key,
            origin: KeyOrigin::UserEntered,
            generation: new_generation,
        });
        Ok(outcome)
    }

    /// Clears the check text, every saved password, and the in-memory key.
    ///
    /// # Errors
    /// Returns an error if the stores reject the cleanup writes.
    #[instrument(skip_all, fields(user = %account.username))]
    pub async fn reset(&mut self, account: &mut UserAccount) -> Result<(), Error> {
        self.secrets
            .remove_by_user(account.id)
            .await
            .map_err(Error::Internal)?;
        account.masterpass_check = None;
        self.users.commit(account).await.map_err(Error::Internal)?;
        self.state = None;
        info!("master password reset");
        Ok(())
    }

    async fn write_check(
        &self,
        account: &mut UserAccount,
        key: &KeyMaterial,
        generation: u32,
    ) -> Result<(), Error> {
        let check = check_text::set(key, account.id)?;
        let blob = MasterPassCheck {
            generation,
            check: Base64::encode_string(&check),
        };
        account.masterpass_check = Some(blob.encode()?);
        self.users.commit(account).await.map_err(Error::Internal)?;
        Ok(())
    }

    /// Keyring read, off the async runtime and bounded by the configured
    /// timeout. A timeout is reported as `Locked` (retryable) rather than
    /// permanently disabling the feature.
    async fn keyring_get(&self, account: &UserAccount) -> Result<Option<String>, KeyringError> {
        let keyring = Arc::clone(&self.keyring);
        let service = self.config.keyring_name().to_string();
        let user = account.username.clone();
        let task = tokio::task::spawn_blocking(move || keyring.get(&service, &user));
        match tokio::time::timeout(self.config.keyring_timeout(), task).await {
            Err(_) => Err(KeyringError::Locked),
            Ok(Err(join)) => Err(KeyringError::Other(join.to_string())),
            Ok(Ok(result)) => result,
        }
    }

    async fn keyring_set(
        &self,
        account: &UserAccount,
        value: &str,
    ) -> Result<(), KeyringError> {
        let keyring = Arc::clone(&self.keyring);
        let service = self.config.keyring_name().to_string();
        let user = account.username.clone();
        let value = value.to_string();
        let task = tokio::task::spawn_blocking(move || keyring.set(&service, &user, &value));
        match tokio::time::timeout(self.config.keyring_timeout(), task).await {
            Err(_) => Err(KeyringError::Locked),
            Ok(Err(join)) => Err(KeyringError::Other(join.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}
