//! Signed-in identity used to address and authenticate sync uploads.

use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::VitalsError;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
});

/// Mints the bearer token presented to the sync server.
#[async_trait]
pub trait IdentityTokenProvider: Send + Sync + 'static {
    async fn id_token(&self) -> Result<SecretString, VitalsError>;
}

/// A pre-minted token handed over by the host application.
pub struct StaticIdentityToken(SecretString);

impl StaticIdentityToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token.into().into()))
    }
}

#[async_trait]
impl IdentityTokenProvider for StaticIdentityToken {
    async fn id_token(&self) -> Result<SecretString, VitalsError> {
        if self.0.expose_secret().is_empty() {
            return Err(VitalsError::Authorization("identity token is empty".into()));
        }
        Ok(self.0.clone())
    }
}

#[derive(Clone)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    identity: Arc<dyn IdentityTokenProvider>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        identity: Arc<dyn IdentityTokenProvider>,
    ) -> Result<Self, VitalsError> {
        let user_id = user_id.into();
        let email = email.into();
        if user_id.trim().is_empty() {
            return Err(VitalsError::InvalidInput("user id must not be empty".into()));
        }
        if !EMAIL_RE.is_match(&email) {
            return Err(VitalsError::InvalidInput(format!("invalid email address: {email}")));
        }
        Ok(Self {
            user_id,
            email,
            identity,
        })
    }

    pub async fn id_token(&self) -> Result<SecretString, VitalsError> {
        self.identity.id_token().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Shared slot holding the current session, if any.
#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sign_in(&self, session: Session) {
        tracing::info!(user_id = %session.user_id, "signed in");
        *self.inner.write().await = Some(session);
    }

    pub async fn sign_out(&self) {
        if let Some(previous) = self.inner.write().await.take() {
            tracing::info!(user_id = %previous.user_id, "signed out");
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Arc<dyn IdentityTokenProvider> {
        Arc::new(StaticIdentityToken::new("id-token"))
    }

    #[test]
    fn session_validates_email() {
        assert!(Session::new("u1", "alice@example.com", identity()).is_ok());
        assert!(matches!(
            Session::new("u1", "not-an-email", identity()),
            Err(VitalsError::InvalidInput(_))
        ));
        assert!(Session::new("", "alice@example.com", identity()).is_err());
    }

    #[tokio::test]
    async fn context_sign_in_and_out() {
        let ctx = SessionContext::new();
        assert!(ctx.current().await.is_none());

        ctx.sign_in(Session::new("u1", "alice@example.com", identity()).unwrap())
            .await;
        let current = ctx.current().await.expect("session");
        assert_eq!(current.user_id, "u1");
        assert_eq!(current.id_token().await.unwrap().expose_secret(), "id-token");

        ctx.sign_out().await;
        assert!(ctx.current().await.is_none());
    }

    #[tokio::test]
    async fn empty_static_token_is_rejected() {
        let token = StaticIdentityToken::new("");
        assert!(matches!(
            token.id_token().await,
            Err(VitalsError::Authorization(_))
        ));
    }

    #[test]
    fn debug_hides_identity() {
        let s = Session::new("u1", "alice@example.com", identity()).unwrap();
        let dbg = format!("{s:?}");
        assert!(dbg.contains("alice@example.com"));
        assert!(!dbg.contains("id-token"));
    }
}
