//! External identity sources: LDAP, Kerberos, OAuth 2 and webserver.
//!
//! Their wire protocols (bind, ticket exchange, token flows) live outside
//! this crate; each source wraps an injected [`IdentityVerifier`] and only
//! contributes its form rules and its place in the chain.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::auth::source::{
    AuthenticatedUser, AuthenticationSource, Credentials, LoginReply, SourceKind, bad_credentials,
};
use crate::error::{Error, Field};

/// Opaque capability performing the actual identity check for an external
/// backend. Implementations may block on the network.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<AuthenticatedUser>;
}

/// Default verifier for sources that are configured but have no backend
/// wired up; rejects everything with a configuration hint.
#[derive(Debug, Clone)]
pub struct RejectingVerifier {
    backend: &'static str,
}

impl RejectingVerifier {
    #[must_use]
    pub fn new(backend: &'static str) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl IdentityVerifier for RejectingVerifier {
    async fn verify(&self, _credentials: &Credentials) -> Result<AuthenticatedUser> {
        Err(anyhow::anyhow!("{} support is not configured", self.backend))
    }
}

pub struct LdapSource {
    verifier: Arc<dyn IdentityVerifier>,
}

impl LdapSource {
    #[must_use]
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl AuthenticationSource for LdapSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Ldap
    }

    // LDAP shares the password form with Internal.
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
        self.verifier
            .verify(credentials)
            .await
            .map_err(|_| bad_credentials(SourceKind::Ldap))
    }

    async fn login(&self, _credentials: &Credentials) -> Result<LoginReply, Error> {
        Ok(LoginReply::default())
    }
}

pub struct KerberosSource {
    verifier: Arc<dyn IdentityVerifier>,
    /// Secondary flow offered when ticket negotiation cannot complete in
    /// one round trip.
    negotiate_redirect: Option<String>,
}

impl KerberosSource {
    #[must_use]
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            verifier,
            negotiate_redirect: None,
        }
    }

    #[must_use]
    pub fn with_negotiate_redirect(mut self, redirect: impl Into<String>) -> Self {
        self.negotiate_redirect = Some(redirect.into());
        self
    }
}

#[async_trait]
impl AuthenticationSource for KerberosSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Kerberos
    }

    // The ticket is ambient; there is no form to check.
    fn validate(&self, _credentials: &Credentials) -> Result<(), Error> {
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedUser, Error> {
        self.verifier.verify(credentials).await.map_err(|e| {
            Error::authentication(SourceKind::Kerberos, e.to_string())
        })
    }

    async fn login(&self, _credentials: &Credentials) -> Result<LoginReply, Error> {
        // Not a hard failure: the caller is sent to the negotiate flow.
        Ok(LoginReply {
            redirect: self.negotiate_redirect.clone(),
            message: None,
        })
    }
}

pub struct Oauth2Source {
    verifier: Arc<dyn IdentityVerifier>,
}

impl Oauth2Source {
    #[must_use]
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl AuthenticationSource for Oauth2Source {
    fn kind(&self) -> SourceKind {
        SourceKind::Oauth2
    }

    // The provider callback carries the proof; nothing to check locally.
    fn validate(&self, _credentials: &Credentials) -> Result<(), Error> {
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedUser, Error> {
        self.verifier
            .verify(credentials)
            .await
            .map_err(|e| Error::authentication(SourceKind::Oauth2, e.to_string()))
    }

    async fn login(&self, _credentials: &Credentials) -> Result<LoginReply, Error> {
        Ok(LoginReply::default())
    }
}

/// Trusts the identity the hosting webserver asserted (e.g. `REMOTE_USER`).
#[derive(Debug, Default)]
pub struct WebserverSource;

impl WebserverSource {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthenticationSource for WebserverSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Webserver
    }

    fn validate(&self, credentials: &Credentials) -> Result<(), Error> {
        match credentials.remote_user.as_deref() {
            Some(user) if !user.is_empty() => Ok(()),
            _ => Err(Error::validation(
                Field::Other,
                "no webserver-asserted identity present",
            )),
        }
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthenticatedUser, Error> {
        match credentials.remote_user.as_deref() {
            Some(user) if !user.is_empty() => Ok(AuthenticatedUser {
                username: user.to_string(),
            }),
            _ => Err(Error::authentication(
                SourceKind::Webserver,
                "no webserver-asserted identity present",
            )),
        }
    }

    async fn login(&self, _credentials: &Credentials) -> Result<LoginReply, Error> {
        Ok(LoginReply::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct AllowVerifier;

    #[async_trait]
    impl IdentityVerifier for AllowVerifier {
        async fn verify(&self, credentials: &Credentials) -> Result<AuthenticatedUser> {
            Ok(AuthenticatedUser {
                username: credentials.username.to_lowercase(),
            })
        }
    }

    #[tokio::test]
    async fn ldap_normalizes_through_the_verifier() {
        let source = LdapSource::new(Arc::new(AllowVerifier));
        let user = source
            .authenticate(&Credentials::new("Ada@Example.COM", "pw"))
            .await
            .unwrap();
        assert_eq!(user.username, "ada@example.com");
    }

    #[tokio::test]
    async fn unconfigured_backend_rejects() {
        let source = LdapSource::new(Arc::new(RejectingVerifier::new("LDAP")));
        let err = source
            .authenticate(&Credentials::new("ada", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication { .. }));
    }

    #[tokio::test]
    async fn kerberos_login_offers_negotiate_redirect() {
        let source = KerberosSource::new(Arc::new(AllowVerifier))
            .with_negotiate_redirect("/auth/kerberos/negotiate");
        let reply = source.login(&Credentials::new("ada", "")).await.unwrap();
        assert_eq!(reply.redirect.as_deref(), Some("/auth/kerberos/negotiate"));
    }

    #[tokio::test]
    async fn webserver_source_requires_asserted_identity() {
        let source = WebserverSource::new();
        let bare = Credentials::new("", "");
        assert!(source.validate(&bare).is_err());
        assert!(source.authenticate(&bare).await.is_err());

        let asserted = Credentials::new("", "").with_remote_user("ada");
        source.validate(&asserted).unwrap();
        let user = source.authenticate(&asserted).await.unwrap();
        assert_eq!(user.username, "ada");
    }
}
