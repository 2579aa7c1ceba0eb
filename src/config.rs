//! Externally-owned configuration consumed by the core.
//!
//! The hosting application loads these values however it likes; the core
//! only ever sees this immutable snapshot. The one runtime-mutable knob,
//! the OS-secret-storage kill-switch, lives in
//! [`crate::masterkey::OsStorageSwitch`], not here.

use std::time::Duration;

use crate::auth::source::SourceKind;

const DEFAULT_MAX_LOGIN_ATTEMPTS: i32 = 3;
const DEFAULT_KEYRING_NAME: &str = "gardi";
const DEFAULT_KEYRING_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct Config {
    max_login_attempts: i32,
    authentication_sources: Vec<SourceKind>,
    master_password_required: bool,
    use_os_secret_storage: bool,
    master_password_hook: Option<String>,
    server_mode: bool,
    keyring_name: String,
    keyring_timeout: Duration,
    hook_timeout: Duration,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            authentication_sources: vec![SourceKind::Internal],
            master_password_required: true,
            use_os_secret_storage: true,
            master_password_hook: None,
            server_mode: false,
            keyring_name: DEFAULT_KEYRING_NAME.to_string(),
            keyring_timeout: DEFAULT_KEYRING_TIMEOUT,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    /// `<= 0` disables the failed-login lockout entirely.
    #[must_use]
    pub fn with_max_login_attempts(mut self, attempts: i32) -> Self {
        self.max_login_attempts = attempts;
        self
    }

    /// Ordered list of sources to try; order is the attempt priority.
    #[must_use]
    pub fn with_authentication_sources(mut self, sources: Vec<SourceKind>) -> Self {
        self.authentication_sources = sources;
        self
    }

    #[must_use]
    pub fn with_master_password_required(mut self, required: bool) -> Self {
        self.master_password_required = required;
        self
    }

    #[must_use]
    pub fn with_use_os_secret_storage(mut self, enabled: bool) -> Self {
        self.use_os_secret_storage = enabled;
        self
    }

    /// Command invoked to obtain the master password when the OS keyring is
    /// not in play. Empty output means "ask the user".
    #[must_use]
    pub fn with_master_password_hook(mut self, command: Option<String>) -> Self {
        self.master_password_hook = command;
        self
    }

    /// Multi-user server deployment: keys are session-scoped and the OS
    /// keyring is never consulted.
    #[must_use]
    pub fn with_server_mode(mut self, server_mode: bool) -> Self {
        self.server_mode = server_mode;
        self
    }

    /// Service name under which the generated key is filed in the keyring.
    #[must_use]
    pub fn with_keyring_name(mut self, name: impl Into<String>) -> Self {
        self.keyring_name = name.into();
        self
    }

    #[must_use]
    pub fn with_keyring_timeout(mut self, timeout: Duration) -> Self {
        self.keyring_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_login_attempts(&self) -> i32 {
        self.max_login_attempts
    }

    #[must_use]
    pub fn authentication_sources(&self) -> &[SourceKind] {
        &self.authentication_sources
    }

    #[must_use]
    pub fn master_password_required(&self) -> bool {
        self.master_password_required
    }

    #[must_use]
    pub fn use_os_secret_storage(&self) -> bool {
        self.use_os_secret_storage
    }

    #[must_use]
    pub fn master_password_hook(&self) -> Option<&str> {
        self.master_password_hook.as_deref()
    }

    #[must_use]
    pub fn server_mode(&self) -> bool {
        self.server_mode
    }

    #[must_use]
    pub fn keyring_name(&self) -> &str {
        &self.keyring_name
    }

    #[must_use]
    pub fn keyring_timeout(&self) -> Duration {
        self.keyring_timeout
    }

    #[must_use]
    pub fn hook_timeout(&self) -> Duration {
        self.hook_timeout
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
