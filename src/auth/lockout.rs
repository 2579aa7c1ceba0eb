//! Failed-login bookkeeping for Internal-source accounts.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::users::{LockoutStatus, UserAccount, UserStore};

/// Tracks consecutive failed validations and locks the account once the
/// configured ceiling is hit. The counter updates go through the store's
/// atomic read-modify-write so concurrent attempts never lose an increment.
#[derive(Clone)]
pub struct LoginAttemptLimiter {
    users: Arc<dyn UserStore>,
    max_attempts: i32,
}

impl LoginAttemptLimiter {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, max_attempts: i32) -> Self {
        Self {
            users,
            max_attempts,
        }
    }

    /// Re-evaluated before every validation, so a locked account is
    /// rejected without revealing whether the credential was otherwise
    /// correct. `max_attempts <= 0` disables the feature.
    #[must_use]
    pub fn is_locked(&self, account: &UserAccount) -> bool {
        self.max_attempts > 0 && account.login_attempts >= self.max_attempts as u32
    }

    /// Records one failed attempt and refreshes the account's view of the
    /// counter and lock flag.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn record_failure(&self, account: &mut UserAccount) -> Result<LockoutStatus> {
        let status = self
            .users
            .record_login_failure(account.id, self.max_attempts)
            .await?;
        account.login_attempts = status.login_attempts;
        account.locked = status.locked;
        if status.locked {
            warn!(user = %account.username, attempts = status.login_attempts, "account locked");
        }
        Ok(status)
    }

    /// Resets the counter after a successful login. The lock flag is left
    /// alone; a locked account only leaves that state through the
    /// locked-account flow.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn record_success(&self, account: &mut UserAccount) -> Result<()> {
        self.users.record_login_success(account.id).await?;
        account.login_attempts = 0;
        Ok(())
    }
}
