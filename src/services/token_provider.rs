use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::models::sync::TokenError;

/// Bearer credential issued by the session layer.
#[derive(Debug, Clone)]
pub struct Credential {
    token: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::new(token.into().into_boxed_str()),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }
}

/// Session layer seen from the sync client. Sign-in and re-authentication UI
/// live behind this trait.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn current_token(&self) -> Option<Credential>;

    async fn refresh(&self) -> Result<Credential, TokenError>;
}

/// Fixed credential, e.g. a service key. Refreshing hands back the same value.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn current_token(&self) -> Option<Credential> {
        Some(self.credential.clone())
    }

    async fn refresh(&self) -> Result<Credential, TokenError> {
        Ok(self.credential.clone())
    }
}
