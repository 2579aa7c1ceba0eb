//! One login attempt, end to end.
//!
//! The chain builds the attempt's source list, rejects locked accounts
//! before anything else, then walks validate → authenticate → login in
//! configured priority order. Lockout bookkeeping only ever applies to the
//! Internal source and an existing account.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::auth::AuthSourceRegistry;
use crate::auth::lockout::LoginAttemptLimiter;
use crate::auth::source::{
    Affordance, AuthenticatedUser, Credentials, LoginReply, SourceKind, select_sources,
};
use crate::error::{Error, Field};
use crate::users::{UserAccount, UserStore};

/// Ephemeral, serializable record of a resolved attempt; the hosting
/// application stashes it in whatever session mechanism it has.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthChainState {
    /// Ordered source list this attempt ran against.
    pub sources: Vec<SourceKind>,
    pub current_source: SourceKind,
    pub source_friendly_name: String,
}

/// Everything the caller needs after a successful login.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub state: AuthChainState,
    pub user: AuthenticatedUser,
    pub reply: LoginReply,
}

pub struct AuthChain {
    registry: Arc<AuthSourceRegistry>,
    limiter: LoginAttemptLimiter,
    users: Arc<dyn UserStore>,
    configured: Vec<SourceKind>,
}

impl AuthChain {
    #[must_use]
    pub fn new(
        registry: Arc<AuthSourceRegistry>,
        limiter: LoginAttemptLimiter,
        users: Arc<dyn UserStore>,
        configured: Vec<SourceKind>,
    ) -> Self {
        Self {
            registry,
            limiter,
            users,
            configured,
        }
    }

    /// Runs one attempt to completion.
    ///
    /// # Errors
    /// `AccountLocked` before any credential is examined for a locked
    /// account; `Validation` when every source rejects the form;
    /// `Authentication` when no source accepts the identity; whatever the
    /// winning source's `login` surfaces.
    #[instrument(skip_all, fields(username = %credentials.username, affordance = ?affordance))]
    pub async fn login(
        &self,
        credentials: &Credentials,
        affordance: Affordance,
    ) -> Result<LoginSuccess, Error> {
        let sources = select_sources(&self.configured, affordance);
        if sources.is_empty() {
            return Err(Error::Internal(anyhow::anyhow!(
                "no authentication sources available for this login path"
            )));
        }

        let mut account = self
            .users
            .find_by_username(&credentials.username)
            .await
            .map_err(Error::Internal)?;

        // Locked accounts are turned away before validation so the response
        // cannot leak whether the submitted credential was correct.
        if let Some(acc) = &account {
            if self.limiter.is_locked(acc) {
                warn!("rejecting login for locked account");
                return Err(Error::AccountLocked);
            }
        }

        self.validate(&sources, credentials, account.as_mut()).await?;

        let (winner, user) = self
            .authenticate(&sources, credentials, account.as_mut())
            .await?;

        if let Some(acc) = account.as_mut() {
            self.limiter
                .record_success(acc)
                .await
                .map_err(Error::Internal)?;
        }

        let source = self
            .registry
            .get(winner)
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("source disappeared mid-attempt")))?;
        let reply = source.login(credentials).await?;

        debug!(source = %winner, "login complete");
        Ok(LoginSuccess {
            state: AuthChainState {
                sources,
                current_source: winner,
                source_friendly_name: winner.friendly_name().to_string(),
            },
            user,
            reply,
        })
    }

    /// First source whose form validation passes wins; if every source
    /// rejects, a password-field error against an existing account counts
    /// toward the lockout ceiling (when Internal is in the list).
    async fn validate(
        &self,
        sources: &[SourceKind],
        credentials: &Credentials,
        mut account: Option<&mut UserAccount>,
    ) -> Result<(), Error> {
        let mut errors = Vec::new();
        for kind in sources {
            let Some(source) = self.registry.get(*kind) else {
                warn!(source = %kind, "configured source is not loaded");
                continue;
            };
            match source.validate(credentials) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(source = %kind, "validation rejected: {err}");
                    errors.push(err);
                }
            }
        }

        let attempt_relevant = errors.iter().any(|err| {
            matches!(
                err,
                Error::Validation {
                    field: Field::Password,
                    ..
                }
            )
        });
        if attempt_relevant && sources.contains(&SourceKind::Internal) {
            if let Some(acc) = account.as_deref_mut() {
                self.limiter
                    .record_failure(acc)
                    .await
                    .map_err(Error::Internal)?;
            }
        }

        Err(errors
            .into_iter()
            .next()
            .unwrap_or_else(|| Error::Internal(anyhow::anyhow!("no source could validate"))))
    }

    /// First successful identity check wins; Internal failures against an
    /// existing account feed the limiter, and crossing the ceiling surfaces
    /// as `AccountLocked` immediately.
    async fn authenticate(
        &self,
        sources: &[SourceKind],
        credentials: &Credentials,
        mut account: Option<&mut UserAccount>,
    ) -> Result<(SourceKind, AuthenticatedUser), Error> {
        let mut last_failure: Option<Error> = None;
        for kind in sources {
            let Some(source) = self.registry.get(*kind) else {
                continue;
            };
            match source.authenticate(credentials).await {
                Ok(user) => return Ok((*kind, user)),
                Err(err) => {
                    debug!(source = %kind, "authentication rejected: {err}");
                    if *kind == SourceKind::Internal {
                        if let Some(acc) = account.as_deref_mut() {
                            let status = self
                                .limiter
                                .record_failure(acc)
                                .await
                                .map_err(Error::Internal)?;
                            if status.locked {
                                return Err(Error::AccountLocked);
                            }
                        }
                    }
                    last_failure = Some(err);
                }
            }
        }

        Err(last_failure
            .unwrap_or_else(|| Error::Internal(anyhow::anyhow!("no source could authenticate"))))
    }
}
