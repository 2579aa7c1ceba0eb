//! HTTP-agnostic request surface.
//!
//! The hosting application owns routing, cookies and rendering; it calls
//! these functions with an explicit [`AppContext`] (process-wide
//! collaborators, built once at startup) and a [`Session`] (one per
//! authenticated principal). Nothing here reaches into ambient globals.

pub mod login;
pub mod master_key;

use std::sync::Arc;

use crate::auth::AuthSourceRegistry;
use crate::auth::chain::{AuthChain, AuthChainState};
use crate::auth::lockout::LoginAttemptLimiter;
use crate::config::Config;
use crate::masterkey::hook::HookRunner;
use crate::masterkey::keyring::KeyringBackend;
use crate::masterkey::{MasterKeyManager, OsStorageSwitch};
use crate::secret::SecretStore;
use crate::secret::service::SavedPasswordService;
use crate::users::{UserAccount, UserStore};

/// Process-wide collaborators, created once at startup.
#[derive(Clone)]
pub struct AppContext {
    config: Config,
    registry: Arc<AuthSourceRegistry>,
    users: Arc<dyn UserStore>,
    secrets: Arc<dyn SecretStore>,
    keyring: Arc<dyn KeyringBackend>,
    hook: Arc<dyn HookRunner>,
    os_storage: OsStorageSwitch,
}

impl AppContext {
    #[must_use]
    pub fn new(
        config: Config,
        registry: Arc<AuthSourceRegistry>,
        users: Arc<dyn UserStore>,
        secrets: Arc<dyn SecretStore>,
        keyring: Arc<dyn KeyringBackend>,
        hook: Arc<dyn HookRunner>,
    ) -> Self {
        Self {
            config,
            registry,
            users,
            secrets,
            keyring,
            hook,
            os_storage: OsStorageSwitch::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    #[must_use]
    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    #[must_use]
    pub fn os_storage(&self) -> &OsStorageSwitch {
        &self.os_storage
    }

    /// The chain for one login attempt.
    #[must_use]
    pub fn auth_chain(&self) -> AuthChain {
        AuthChain::new(
            Arc::clone(&self.registry),
            LoginAttemptLimiter::new(Arc::clone(&self.users), self.config.max_login_attempts()),
            Arc::clone(&self.users),
            self.config.authentication_sources().to_vec(),
        )
    }

    #[must_use]
    pub fn saved_passwords(&self) -> SavedPasswordService {
        SavedPasswordService::new(Arc::clone(&self.secrets))
    }

    /// Opens a fresh session scope. In server mode every authenticated
    /// principal gets its own; in desktop mode the process holds one.
    #[must_use]
    pub fn open_session(&self) -> Session {
        Session {
            account: None,
            auth_state: None,
            master_key: MasterKeyManager::new(
                self.config.clone(),
                Arc::clone(&self.users),
                Arc::clone(&self.secrets),
                Arc::clone(&self.keyring),
                Arc::clone(&self.hook),
                self.os_storage.clone(),
            ),
        }
    }
}

/// Per-principal state: who is logged in, which source won, and the
/// session's resolved master key. Dropped (or `logout` is called) when the
/// session ends, taking the key with it.
pub struct Session {
    pub account: Option<UserAccount>,
    pub auth_state: Option<AuthChainState>,
    pub master_key: MasterKeyManager,
}

impl Session {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }

    /// Ends the session: forgets the principal, the chain state, and the
    /// in-memory key.
    pub fn logout(&mut self) {
        self.account = None;
        self.auth_state = None;
        self.master_key.clear();
    }
}
