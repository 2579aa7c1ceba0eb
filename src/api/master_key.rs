//! Master-key endpoints: status, set, change, reset.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, warn};

use crate::api::{AppContext, Session};
use crate::error::Error;
use crate::masterkey::KeyResolution;

#[derive(Debug, Serialize)]
pub struct MasterKeyStatus {
    pub present: bool,
}

/// Whether the caller needs to be prompted for a master password.
#[must_use]
pub fn master_key_status(ctx: &AppContext, session: &Session) -> MasterKeyStatus {
    MasterKeyStatus {
        present: session.master_key.is_resolved() || !ctx.config().master_password_required(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SetMasterKeyRequest {
    #[serde(default)]
    pub password: String,
    /// True when the user explicitly typed the password into the prompt.
    #[serde(default)]
    pub submit_password: bool,
}

#[derive(Debug, Serialize)]
pub struct SetMasterKeyResponse {
    pub present: bool,
    pub reset: bool,
    pub errmsg: Option<String>,
    pub keyring_name: String,
    pub master_password_hook: bool,
    pub is_error: bool,
}

impl SetMasterKeyResponse {
    fn base(ctx: &AppContext) -> Self {
        Self {
            present: false,
            reset: false,
            errmsg: None,
            keyring_name: ctx.config().keyring_name().to_string(),
            master_password_hook: ctx.config().master_password_hook().is_some(),
            is_error: false,
        }
    }
}

/// Runs the resolution ladder with whatever the user submitted.
///
/// `present: false` with no error means the caller should prompt for the
/// password; `is_error: true` carries a message to display, and a locked
/// keyring is retry-oriented rather than fatal.
#[instrument(skip_all)]
pub async fn set_master_key(
    ctx: &AppContext,
    session: &mut Session,
    request: SetMasterKeyRequest,
) -> SetMasterKeyResponse {
    let mut response = SetMasterKeyResponse::base(ctx);

    if !ctx.config().master_password_required() {
        response.present = true;
        return response;
    }

    let Some(account) = session.account.as_mut() else {
        response.is_error = true;
        response.errmsg = Some("not authenticated".to_string());
        return response;
    };

    let submitted = (request.submit_password && !request.password.is_empty())
        .then(|| SecretString::from(request.password));

    match session
        .master_key
        .resolve(account, submitted.as_ref())
        .await
    {
        Ok(KeyResolution::Resolved) => {
            response.present = true;
        }
        Ok(KeyResolution::NeedsUserInput) => {
            response.present = false;
        }
        Err(Error::KeyringLocked) => {
            warn!("OS keyring is locked");
            response.is_error = true;
            response.errmsg = Some(
                "The OS keyring is locked. Unlock it and try again.".to_string(),
            );
        }
        Err(err @ (Error::IncorrectMasterPassword | Error::KeyringUnavailable)) => {
            response.is_error = true;
            response.errmsg = Some(err.to_string());
        }
        Err(err) => {
            error!("master key resolution failed: {err:?}");
            response.is_error = true;
            response.errmsg = Some(err.to_string());
        }
    }

    response
}

#[derive(Debug, Deserialize)]
pub struct ChangeMasterKeyRequest {
    pub password: String,
}

/// Rotates to a new user-entered master password, re-encrypting every
/// saved server password before success is reported.
#[instrument(skip_all)]
pub async fn change_master_key(
    ctx: &AppContext,
    session: &mut Session,
    request: ChangeMasterKeyRequest,
) -> SetMasterKeyResponse {
    let mut response = SetMasterKeyResponse::base(ctx);

    let Some(account) = session.account.as_mut() else {
        response.is_error = true;
        response.errmsg = Some("not authenticated".to_string());
        return response;
    };
    if request.password.is_empty() {
        response.is_error = true;
        response.errmsg = Some("a new master password is required".to_string());
        return response;
    }

    let new_passphrase = SecretString::from(request.password);
    match session.master_key.rotate(account, &new_passphrase).await {
        Ok(_) => {
            response.present = true;
        }
        Err(err @ Error::MigrationPartialFailure(_)) => {
            // The old generation stays authoritative; the caller may retry
            // or explicitly discard the unreadable entries.
            response.is_error = true;
            response.errmsg = Some(err.to_string());
        }
        Err(err) => {
            error!("master key rotation failed: {err:?}");
            response.is_error = true;
            response.errmsg = Some(err.to_string());
        }
    }

    response
}

#[derive(Debug, Serialize)]
pub struct ResetMasterKeyResponse {
    pub status: bool,
}

/// Clears the key, the check text and every saved password, then tries a
/// hook-based re-acquisition when a hook is configured.
#[instrument(skip_all)]
pub async fn reset_master_key(ctx: &AppContext, session: &mut Session) -> ResetMasterKeyResponse {
    let Some(account) = session.account.as_mut() else {
        return ResetMasterKeyResponse { status: false };
    };

    if let Err(err) = session.master_key.reset(account).await {
        error!("master key reset failed: {err:?}");
        return ResetMasterKeyResponse { status: false };
    }

    if ctx.config().master_password_hook().is_some() {
        if let Err(err) = session.master_key.resolve(account, None).await {
            warn!("hook-based re-acquisition after reset failed: {err}");
        }
    }

    ResetMasterKeyResponse { status: true }
}
