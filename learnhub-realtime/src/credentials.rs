//! Bearer credential collaborator. Token acquisition lives outside this
//! crate; the realtime layer only reads the current token as an opaque string.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

/// Source of the bearer token presented on connect and on REST calls.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, `None` when the user is signed out or the token expired.
    async fn get_token(&self) -> Option<String>;

    /// Ask the collaborator for a fresh token after the server rejected the current one.
    async fn refresh(&self) -> Option<String> {
        self.get_token().await
    }
}

/// Fixed token, replaceable at runtime (logout, token rotation).
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: Mutex<Option<String>>,
}

impl StaticCredentials {
    /// Provider holding `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    /// Provider with no token.
    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Replaces the token; `None` signs the user out.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    variable: String,
}

impl EnvCredentials {
    /// Provider reading `variable`.
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn get_token(&self) -> Option<String> {
        std::env::var(&self.variable)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials_can_be_revoked() {
        let credentials = StaticCredentials::new("secret");
        assert_eq!(credentials.get_token().await.as_deref(), Some("secret"));
        assert_eq!(credentials.refresh().await.as_deref(), Some("secret"));

        credentials.set_token(None);
        assert!(credentials.get_token().await.is_none());
    }

    #[tokio::test]
    async fn env_credentials_ignore_blank_tokens() {
        let credentials = EnvCredentials::new("LEARNHUB_TEST_TOKEN_UNSET_FOR_SURE");
        assert!(credentials.get_token().await.is_none());
    }
}
