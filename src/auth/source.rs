//! The pluggable identity-source contract.
//!
//! A source exposes three capabilities, invoked in order by the chain:
//! `validate` (cheap, local form checks), `authenticate` (the actual
//! identity check, possibly network-bound) and `login` (session
//! finalization, idempotent on repeated success). Wire protocols of the
//! external variants are out of scope here; they arrive as an injected
//! [`IdentityVerifier`](crate::auth::external::IdentityVerifier).

use std::str::FromStr;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a loaded authentication source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Internal,
    Ldap,
    Kerberos,
    Oauth2,
    Webserver,
}

/// Pairs of sources that may not share a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionGroup {
    /// Password-form sources: Internal, with LDAP as its fallback.
    PasswordForm,
    /// Redirect-driven external sources, one per attempt.
    External,
    /// Ambient identity asserted by the hosting webserver; compatible with
    /// every affordance.
    Ambient,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Ldap => "ldap",
            Self::Kerberos => "kerberos",
            Self::Oauth2 => "oauth2",
            Self::Webserver => "webserver",
        }
    }

    /// Human-readable name recorded into the chain state on success.
    #[must_use]
    pub fn friendly_name(self) -> &'static str {
        match self {
            Self::Internal => "Internal",
            Self::Ldap => "LDAP",
            Self::Kerberos => "Kerberos",
            Self::Oauth2 => "OAuth 2",
            Self::Webserver => "Webserver",
        }
    }

    #[must_use]
    pub fn exclusion_group(self) -> ExclusionGroup {
        match self {
            Self::Internal | Self::Ldap => ExclusionGroup::PasswordForm,
            Self::Kerberos | Self::Oauth2 => ExclusionGroup::External,
            Self::Webserver => ExclusionGroup::Ambient,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "internal" => Ok(Self::Internal),
            "ldap" => Ok(Self::Ldap),
            "kerberos" => Ok(Self::Kerberos),
            "oauth2" => Ok(Self::Oauth2),
            "webserver" => Ok(Self::Webserver),
            other => Err(format!("unknown authentication source: {other}")),
        }
    }
}

/// Which login affordance the caller invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affordance {
    /// The username/password form: Internal with LDAP as fallback.
    #[default]
    Form,
    Kerberos,
    Oauth2,
}

/// Builds the ordered source list for one attempt.
///
/// Pure function of the configured order and the invoked affordance; shared
/// configuration is never mutated. The form affordance keeps every
/// non-external source (selecting it never removes Internal), while an
/// external affordance narrows the list to that source plus any ambient one.
#[must_use]
pub fn select_sources(configured: &[SourceKind], affordance: Affordance) -> Vec<SourceKind> {
    configured
        .iter()
        .copied()
        .filter(|kind| match affordance {
            Affordance::Form => kind.exclusion_group() != ExclusionGroup::External,
            Affordance::Kerberos => {
                *kind == SourceKind::Kerberos || kind.exclusion_group() == ExclusionGroup::Ambient
            }
            Affordance::Oauth2 => {
                *kind == SourceKind::Oauth2 || kind.exclusion_group() == ExclusionGroup::Ambient
            }
        })
        .collect()
}

/// Submitted credentials for one login attempt.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    /// Identity asserted by the hosting webserver, when present.
    pub remote_user: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            remote_user: None,
        }
    }

    #[must_use]
    pub fn with_remote_user(mut self, remote_user: impl Into<String>) -> Self {
        self.remote_user = Some(remote_user.into());
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("remote_user", &self.remote_user)
            .finish()
    }
}

/// Normalized identity returned by a successful `authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub username: String,
}

/// Outcome of a source's `login` step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginReply {
    /// Secondary flow the caller must follow instead of completing here.
    pub redirect: Option<String>,
    pub message: Option<String>,
}

/// Descriptor of a configured source, as shown to administrators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationSourceDescriptor {
    pub kind: SourceKind,
    pub friendly_name: String,
    /// Position in the configured attempt order.
    pub order: usize,
}

#[async_trait]
pub trait AuthenticationSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Cheap, local form validation for this source; performs no I/O.
    fn validate(&self, credentials: &Credentials) -> Result<()>;

    /// The actual identity check; may be slow or blocking.
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedUser>;

    /// Finalizes session establishment for this source. Calling it twice
    /// with the same successful credentials is harmless.
    async fn login(&self, credentials: &Credentials) -> Result<LoginReply>;
}

/// Shared rejection message for bad internal/LDAP credentials; deliberately
/// does not reveal whether the username exists.
pub(crate) fn bad_credentials(source: SourceKind) -> Error {
    Error::authentication(source, "incorrect username or password")
}
