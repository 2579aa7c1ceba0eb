//! The login endpoint logic.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::api::{AppContext, Session};
use crate::auth::source::{Affordance, Credentials};
use crate::error::Error;

pub const POST_LOGIN_REDIRECT: &str = "/";
pub const POST_LOGOUT_REDIRECT: &str = "/login";

const LOCKED_ACCOUNT_MESSAGE: &str =
    "Your account is locked. Please contact an administrator to unlock it.";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Which login affordance was invoked; defaults to the password form.
    #[serde(default)]
    pub affordance: Affordance,
    /// Identity asserted by the hosting webserver, when present.
    #[serde(default)]
    pub remote_user: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub redirect: Option<String>,
    pub error: Option<String>,
}

/// Drives one attempt through the chain and, on success, commits the
/// resolved account and chain state into the session.
#[instrument(skip_all, fields(username = %request.username))]
pub async fn login(ctx: &AppContext, session: &mut Session, request: LoginRequest) -> LoginResponse {
    let mut credentials = Credentials::new(request.username, request.password);
    if let Some(remote_user) = request.remote_user {
        credentials = credentials.with_remote_user(remote_user);
    }

    match ctx.auth_chain().login(&credentials, request.affordance).await {
        Ok(success) => {
            let account = match ctx.users().find_by_username(&success.user.username).await {
                Ok(account) => account,
                Err(err) => {
                    error!("failed to load account after login: {err:?}");
                    return LoginResponse {
                        redirect: None,
                        error: Some("internal error".to_string()),
                    };
                }
            };

            session.account = account;
            session.auth_state = Some(success.state);
            debug!("session established");

            LoginResponse {
                redirect: Some(
                    success
                        .reply
                        .redirect
                        .unwrap_or_else(|| POST_LOGIN_REDIRECT.to_string()),
                ),
                error: success.reply.message,
            }
        }
        // Locked accounts are routed to the post-logout page with the
        // admin-contact message, never folded into a generic failure.
        Err(Error::AccountLocked) => LoginResponse {
            redirect: Some(POST_LOGOUT_REDIRECT.to_string()),
            error: Some(LOCKED_ACCOUNT_MESSAGE.to_string()),
        },
        Err(err) => LoginResponse {
            redirect: None,
            error: Some(err.to_string()),
        },
    }
}
