//! The built-in username/password source.

use std::sync::Arc;

use anyhow::Result;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::auth::source::{
    AuthenticatedUser, AuthenticationSource, Credentials, LoginReply, SourceKind, bad_credentials,
};
use crate::error::{Error, Field};
use crate::users::{UserAccount, UserStore};

/// Hashes a password for provisioning, producing an argon2 PHC string.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?
        .to_string())
}

/// Verifies a password against a stored PHC string.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Creates an Internal account with a hashed password.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn provision_internal_account(username: &str, password: &str) -> Result<UserAccount> {
    let mut account = UserAccount::new(username, SourceKind::Internal);
    account.password_hash = Some(hash_password(password)?);
    Ok(account)
}

pub struct InternalSource {
    users: Arc<dyn UserStore>,
}

impl InternalSource {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl AuthenticationSource for InternalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Internal
    }

    fn validate(&self, credentials: &Credentials) -> Result<(), Error> {
        if credentials.username.trim().is_empty() {
            return Err(Error::validation(Field::Username, "username is required"));
        }
        if credentials.password.expose_secret().is_empty() {
            return Err(Error::validation(Field::Password, "password is required"));
        }
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedUser, Error> {
        let account = self
            .users
            .find_by_username(&credentials.username)
            .await
            .map_err(Error::Internal)?;

        // One shared rejection for unknown user and wrong password, so the
        // response never reveals which half was wrong.
        let Some(account) = account else {
            debug!("unknown username");
            return Err(bad_credentials(SourceKind::Internal));
        };
        let Some(hash) = account.password_hash.as_deref() else {
            debug!("account has no password hash");
            return Err(bad_credentials(SourceKind::Internal));
        };
        if !verify_password(credentials.password.expose_secret(), hash) {
            return Err(bad_credentials(SourceKind::Internal));
        }

        Ok(AuthenticatedUser {
            username: account.username,
        })
    }

    async fn login(&self, _credentials: &Credentials) -> Result<LoginReply, Error> {
        Ok(LoginReply::default())
    }
}
